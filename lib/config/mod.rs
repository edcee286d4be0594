//! Configuration: compile-time defaults and the per-workspace `.daemonfile`.

mod daemonfile;
mod defaults;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use daemonfile::*;
pub use defaults::*;
