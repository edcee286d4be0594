//! The partial daemon: the small HTTP server running inside each component
//! container, owning the one worker the container exists for.

mod api;
mod store;
mod worker;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use api::*;
pub use store::*;
pub use worker::*;
