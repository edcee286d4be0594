//! Typed identifiers for daemon-managed objects.
//!
//! Every live object the daemon manages (workspaces, peas, pods, deployments,
//! flows, and the networks that back workspaces) is addressed by a `DaemonID`
//! of the form `j<kind>-<uuid>`. The same identifier doubles as the Docker
//! container name and, in its short `<kind>:<uuid>` form, as the image tag.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::{JinadError, JinadResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kind of object a `DaemonID` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    /// A workspace: upload directory + image + network.
    Workspace,

    /// A single pea container.
    Pea,

    /// A pod container.
    Pod,

    /// A deployment container.
    Deployment,

    /// A flow container.
    Flow,

    /// A bridge network backing a workspace.
    Network,
}

/// Identifier of the form `j<kind>-<uuid>`.
///
/// The string form is stable under roundtrip: `parse(format(k, u)) == (k, u)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DaemonID {
    kind: IdKind,
    uuid: Uuid,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl IdKind {
    /// All kinds, in routing order.
    pub const ALL: [IdKind; 6] = [
        IdKind::Workspace,
        IdKind::Pea,
        IdKind::Pod,
        IdKind::Deployment,
        IdKind::Flow,
        IdKind::Network,
    ];

    /// The lowercase name used inside identifiers and tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdKind::Workspace => "workspace",
            IdKind::Pea => "pea",
            IdKind::Pod => "pod",
            IdKind::Deployment => "deployment",
            IdKind::Flow => "flow",
            IdKind::Network => "network",
        }
    }
}

impl DaemonID {
    /// Creates a fresh identifier of the given kind with a random UUID.
    pub fn new(kind: IdKind) -> Self {
        Self {
            kind,
            uuid: Uuid::new_v4(),
        }
    }

    /// Creates an identifier from its parts.
    pub fn from_parts(kind: IdKind, uuid: Uuid) -> Self {
        Self { kind, uuid }
    }

    /// The kind prefix of this identifier.
    pub fn kind(&self) -> IdKind {
        self.kind
    }

    /// The UUID component of this identifier.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The short form `<kind>:<uuid>`, usable as a Docker image tag.
    pub fn tag(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.uuid)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdKind {
    type Err = JinadError;

    fn from_str(s: &str) -> JinadResult<Self> {
        match s {
            "workspace" => Ok(IdKind::Workspace),
            "pea" => Ok(IdKind::Pea),
            "pod" => Ok(IdKind::Pod),
            "deployment" => Ok(IdKind::Deployment),
            "flow" => Ok(IdKind::Flow),
            "network" => Ok(IdKind::Network),
            other => Err(JinadError::Validation(format!(
                "unknown identifier kind: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for DaemonID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "j{}-{}", self.kind.as_str(), self.uuid)
    }
}

impl FromStr for DaemonID {
    type Err = JinadError;

    fn from_str(s: &str) -> JinadResult<Self> {
        let rest = s.strip_prefix('j').ok_or_else(|| {
            JinadError::Validation(format!("identifier must start with `j`: {}", s))
        })?;

        let (kind, uuid) = rest.split_once('-').ok_or_else(|| {
            JinadError::Validation(format!("identifier must contain `-`: {}", s))
        })?;

        let kind: IdKind = kind.parse()?;
        let uuid = Uuid::parse_str(uuid)
            .map_err(|e| JinadError::Validation(format!("invalid uuid in `{}`: {}", s, e)))?;

        Ok(Self { kind, uuid })
    }
}

impl Serialize for DaemonID {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DaemonID {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip_all_kinds() {
        for kind in IdKind::ALL {
            let id = DaemonID::new(kind);
            let parsed: DaemonID = id.to_string().parse().unwrap();
            assert_eq!(parsed.kind(), kind);
            assert_eq!(parsed.uuid(), id.uuid());
            assert_eq!(parsed, id);
        }
    }

    #[test]
    fn test_id_tag_form() {
        let uuid = Uuid::new_v4();
        let id = DaemonID::from_parts(IdKind::Workspace, uuid);
        assert_eq!(id.tag(), format!("workspace:{}", uuid));
        assert_eq!(id.to_string(), format!("jworkspace-{}", uuid));
    }

    #[test]
    fn test_id_rejects_bad_uuid() {
        assert!("jworkspace-not-a-uuid".parse::<DaemonID>().is_err());
        assert!("jpea-".parse::<DaemonID>().is_err());
    }

    #[test]
    fn test_id_rejects_unknown_kind() {
        let uuid = Uuid::new_v4();
        assert!(format!("jcluster-{}", uuid).parse::<DaemonID>().is_err());
        assert!(format!("workspace-{}", uuid).parse::<DaemonID>().is_err());
    }

    #[test]
    fn test_id_serde_string_form() {
        let id = DaemonID::new(IdKind::Flow);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: DaemonID = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
