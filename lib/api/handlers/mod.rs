//! Request handlers, grouped by resource.

pub(crate) mod containers;
pub(crate) mod logs;
pub(crate) mod status;
pub(crate) mod workspaces;
