//! Store item types for containerized components (peas, pods, deployments,
//! flows) and the per-kind capability hooks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{JinadError, JinadResult};

use super::{DaemonID, IdKind};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The component kinds a partial daemon can host.
///
/// One `ContainerStore` serves all four kinds; the differences between them,
/// the partial-daemon endpoint suffix and which PUT operations are allowed,
/// live here rather than in a type hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    /// A single pea.
    Pea,

    /// A pod of peas.
    Pod,

    /// A deployment.
    Deployment,

    /// A full flow.
    Flow,
}

/// A live component container as tracked by a container store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerItem {
    /// The workspace this component runs inside.
    pub workspace_id: DaemonID,

    /// Docker-side metadata.
    pub metadata: ContainerMetadata,

    /// The component spec as last reported by the partial daemon.
    pub arguments: ContainerArguments,
}

/// Docker-side state of a component container.
///
/// `container_name` always equals the component's `DaemonID`; `uri` is the
/// partial daemon's HTTP address and stays reachable while the item is live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct ContainerMetadata {
    /// Docker id of the running container.
    pub container_id: String,

    /// Docker name of the container, equal to the component id.
    pub container_name: String,

    /// Id of the workspace image the container was started from.
    pub image_id: String,

    /// Id of the workspace network the container joined.
    pub network: String,

    /// Published ports, keyed by their Docker `<port>/tcp` form.
    #[builder(default)]
    pub ports: BTreeMap<String, u16>,

    /// Base URI of the partial daemon inside the container.
    pub uri: String,

    /// Host port the partial daemon listens on.
    pub minid_port: u16,
}

/// What the component was created from and what it reported back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerArguments {
    /// Last known worker spec, as returned by the partial daemon.
    pub object: serde_json::Value,

    /// Entrypoint command the container was started with.
    pub command: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ContainerKind {
    /// All hostable kinds.
    pub const ALL: [ContainerKind; 4] = [
        ContainerKind::Pea,
        ContainerKind::Pod,
        ContainerKind::Deployment,
        ContainerKind::Flow,
    ];

    /// The lowercase name, matching the partial-daemon endpoint suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Pea => "pea",
            ContainerKind::Pod => "pod",
            ContainerKind::Deployment => "deployment",
            ContainerKind::Flow => "flow",
        }
    }

    /// The `IdKind` this component kind mints identifiers of.
    pub fn id_kind(&self) -> IdKind {
        match self {
            ContainerKind::Pea => IdKind::Pea,
            ContainerKind::Pod => IdKind::Pod,
            ContainerKind::Deployment => IdKind::Deployment,
            ContainerKind::Flow => IdKind::Flow,
        }
    }

    /// Whether the kind supports `scale`.
    pub fn can_scale(&self) -> bool {
        matches!(self, ContainerKind::Pod | ContainerKind::Deployment)
    }

    /// Whether the kind supports `rolling_update`.
    pub fn can_rolling_update(&self) -> bool {
        matches!(
            self,
            ContainerKind::Pod | ContainerKind::Deployment | ContainerKind::Flow
        )
    }

    /// The kind for a component `IdKind`, if it is one.
    pub fn from_id_kind(kind: IdKind) -> JinadResult<Self> {
        match kind {
            IdKind::Pea => Ok(ContainerKind::Pea),
            IdKind::Pod => Ok(ContainerKind::Pod),
            IdKind::Deployment => Ok(ContainerKind::Deployment),
            IdKind::Flow => Ok(ContainerKind::Flow),
            other => Err(JinadError::Validation(format!(
                "`{}` is not a container kind",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContainerKind {
    type Err = JinadError;

    fn from_str(s: &str) -> JinadResult<Self> {
        match s {
            "pea" => Ok(ContainerKind::Pea),
            "pod" => Ok(ContainerKind::Pod),
            "deployment" => Ok(ContainerKind::Deployment),
            "flow" => Ok(ContainerKind::Flow),
            other => Err(JinadError::Validation(format!(
                "unknown container kind: {}",
                other
            ))),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_per_kind() {
        assert!(!ContainerKind::Pea.can_scale());
        assert!(!ContainerKind::Pea.can_rolling_update());
        assert!(ContainerKind::Pod.can_scale());
        assert!(ContainerKind::Pod.can_rolling_update());
        assert!(ContainerKind::Deployment.can_scale());
        assert!(!ContainerKind::Flow.can_scale());
        assert!(ContainerKind::Flow.can_rolling_update());
    }

    #[test]
    fn test_id_kind_mapping_roundtrip() {
        for kind in ContainerKind::ALL {
            assert_eq!(ContainerKind::from_id_kind(kind.id_kind()).unwrap(), kind);
        }
        assert!(ContainerKind::from_id_kind(IdKind::Workspace).is_err());
        assert!(ContainerKind::from_id_kind(IdKind::Network).is_err());
    }
}
