//! The daemon's REST/WebSocket surface: a thin routing layer over the
//! stores, the worker queue, and the log tailer.

mod error;
mod handlers;
mod routes;
mod state;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use error::*;
pub use routes::*;
pub use state::*;
