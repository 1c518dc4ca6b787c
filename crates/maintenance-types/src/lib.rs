//! Shared data model for the maintenance engine: `ActionDescription`,
//! `ActionState`, and the crate-wide error taxonomy. Kept dependency-light
//! and free of any concurrency primitives so every other crate in the
//! workspace can depend on it without pulling in the engine's runtime.

mod description;
mod error;
pub mod kinds;
mod state;

pub use description::{keys, priority, ActionDescription};
pub use error::{MaintenanceError, Result};
pub use state::ActionState;
