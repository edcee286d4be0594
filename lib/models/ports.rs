//! Port declarations for components and their expansion from flow specs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{JinadError, JinadResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Name used for the implicit gateway entry of a flow.
const GATEWAY_NAME: &str = "gateway";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The ports a single component listens on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ports {
    /// Incoming data port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_in: Option<u16>,

    /// Outgoing data port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_out: Option<u16>,

    /// Control port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_ctrl: Option<u16>,

    /// Externally exposed port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_expose: Option<u16>,
}

/// Ports of one pea inside one pod of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Name of the pod the pea belongs to.
    pub pod_name: String,

    /// Name of the pea.
    pub pea_name: String,

    /// The pea's declared ports.
    pub ports: Ports,
}

/// The full port expansion of a flow spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMappings(pub Vec<PortMapping>);

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Ports {
    /// All declared ports, in field order.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        [self.port_in, self.port_out, self.port_ctrl, self.port_expose]
            .into_iter()
            .flatten()
    }
}

impl PortMappings {
    /// Expands a flow YAML spec into per-pea port mappings.
    ///
    /// The gateway's `port_expose` (under `with:`) becomes its own entry;
    /// every executor entry contributes one mapping carrying whatever ports
    /// it declares.
    pub fn from_flow_yaml(yaml: &str) -> JinadResult<Self> {
        let doc: serde_yaml::Value = serde_yaml::from_str(yaml)
            .map_err(|e| JinadError::Validation(format!("invalid flow yaml: {}", e)))?;

        let mut mappings = Vec::new();

        if let Some(port_expose) = doc
            .get("with")
            .and_then(|w| w.get("port_expose"))
            .and_then(|p| p.as_u64())
        {
            mappings.push(PortMapping {
                pod_name: GATEWAY_NAME.to_string(),
                pea_name: GATEWAY_NAME.to_string(),
                ports: Ports {
                    port_expose: Some(port_expose as u16),
                    ..Default::default()
                },
            });
        }

        let executors = doc
            .get("executors")
            .or_else(|| doc.get("pods"))
            .and_then(|e| e.as_sequence());

        if let Some(executors) = executors {
            for (i, executor) in executors.iter().enumerate() {
                let name = executor
                    .get("name")
                    .and_then(|n| n.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("executor{}", i));

                let port = |key: &str| {
                    executor
                        .get(key)
                        .and_then(|p| p.as_u64())
                        .map(|p| p as u16)
                };

                mappings.push(PortMapping {
                    pea_name: name.clone(),
                    pod_name: name,
                    ports: Ports {
                        port_in: port("port_in"),
                        port_out: port("port_out"),
                        port_ctrl: port("port_ctrl"),
                        port_expose: port("port_expose"),
                    },
                });
            }
        }

        Ok(Self(mappings))
    }

    /// The union of ports needed for external binding, deduplicated and sorted.
    pub fn ports(&self) -> Vec<u16> {
        self.0
            .iter()
            .flat_map(|m| m.ports.iter())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// The gateway's exposed port, if the flow declares one.
    pub fn port_expose(&self) -> Option<u16> {
        self.0
            .iter()
            .find(|m| m.pod_name == GATEWAY_NAME)
            .and_then(|m| m.ports.port_expose)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const FLOW_YAML: &str = r#"
jtype: Flow
with:
  port_expose: 12345
executors:
  - name: indexer
    port_in: 45001
    port_out: 45002
  - name: ranker
    port_in: 45002
    port_ctrl: 45100
"#;

    #[test]
    fn test_flow_expansion() {
        let mappings = PortMappings::from_flow_yaml(FLOW_YAML).unwrap();
        assert_eq!(mappings.0.len(), 3);
        assert_eq!(mappings.port_expose(), Some(12345));
        assert_eq!(mappings.0[1].pod_name, "indexer");
        assert_eq!(mappings.0[1].ports.port_in, Some(45001));
    }

    #[test]
    fn test_port_union_is_deduplicated() {
        let mappings = PortMappings::from_flow_yaml(FLOW_YAML).unwrap();
        // 45002 appears both as indexer's out and ranker's in.
        assert_eq!(mappings.ports(), vec![12345, 45001, 45002, 45100]);
    }

    #[test]
    fn test_flow_without_executors() {
        let mappings =
            PortMappings::from_flow_yaml("jtype: Flow\nwith:\n  port_expose: 8080\n").unwrap();
        assert_eq!(mappings.ports(), vec![8080]);
    }

    #[test]
    fn test_invalid_yaml_is_rejected() {
        assert!(PortMappings::from_flow_yaml("executors: [").is_err());
    }
}
