//! Store item types for workspaces.

use std::{collections::BTreeSet, path::PathBuf};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::{DaemonID, WorkspaceState};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A workspace as tracked by the workspace store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceItem {
    /// Current lifecycle state.
    pub state: WorkspaceState,

    /// Docker-side metadata, populated once the first build completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<WorkspaceMetadata>,

    /// What the workspace was built from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<WorkspaceArguments>,
}

/// Docker-side state of a built workspace.
///
/// `image_name` always equals the id's tag form; if `container_id` is set the
/// container runs on `network`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct WorkspaceMetadata {
    /// Id of the image built for this workspace.
    pub image_id: String,

    /// Image tag, `workspace:<uuid>`.
    pub image_name: String,

    /// Id of the bridge network backing this workspace.
    pub network: String,

    /// Absolute path of the workspace directory on the host.
    pub workdir: PathBuf,

    /// Id of the custom container, when the daemonfile declares a `run` command.
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,

    /// Ports published by the custom container.
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,

    /// Live components created inside this workspace. Deleted before the
    /// workspace itself when `everything` is requested.
    #[builder(default)]
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub managed_objects: BTreeSet<DaemonID>,
}

/// The inputs a workspace was built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceArguments {
    /// Names of every file uploaded into the workspace, in upload order.
    pub files: Vec<String>,

    /// Dockerfile the build resolved to.
    pub dockerfile: String,

    /// Whitespace-joined pip requirements gathered from the workspace.
    pub requirements: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl WorkspaceItem {
    /// A freshly admitted workspace with no build output yet.
    pub fn pending() -> Self {
        Self {
            state: WorkspaceState::Pending,
            metadata: None,
            arguments: None,
        }
    }
}
