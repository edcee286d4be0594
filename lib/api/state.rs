use std::sync::Arc;

use crate::{docker::Dockerizer, stores::DaemonStores, tasks::JobSender};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Shared state behind every request handler.
pub struct AppState {
    /// All persistent stores.
    pub stores: Arc<DaemonStores>,

    /// The Docker gateway.
    pub gateway: Arc<Dockerizer>,

    /// Producer side of the workspace build queue.
    pub queue: JobSender,
}
