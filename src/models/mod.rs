//! Data models for the sync core.
//!
//! Field names serialize in camelCase so the embedded store, the backend and
//! the UI layer share one JSON shape.

mod brain_dump;
mod preset;
mod record;
mod routine;
mod subtask;
mod task;
mod wire;

pub use brain_dump::*;
pub use preset::*;
pub use record::*;
pub use routine::*;
pub use subtask::*;
pub use task::*;
pub use wire::*;
