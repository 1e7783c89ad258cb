//! Stream sessions and their registry.

mod registry;
mod session;

pub use registry::StreamRegistry;
pub use session::{StreamId, StreamInfo, StreamSession, StreamState, TransitionError};
