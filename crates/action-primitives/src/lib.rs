//! Primitive DOM actions for the command interpreter
//!
//! - the [`DomActions`] contract a page provider implements
//! - [`ExecCtx`] carrying a deadline and the run's cancellation token
//! - the single await-with-deadline-and-cancel primitive and the element / URL
//!   waits built on it
//! - [`InMemoryPage`], a scripted page used for replay and tests

pub mod errors;
pub mod memory;
mod primitives;
pub mod types;
mod waiting;

pub use errors::*;
pub use memory::{ElementSpec, InMemoryPage, Interaction, PageFixture};
pub use primitives::*;
pub use types::*;
pub use waiting::*;
