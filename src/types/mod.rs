//! Core types shared across the crate.

mod kind;
mod message;
mod usage;

pub use kind::FailureKind;
pub use message::{Message, Role, prompt_text};
pub use usage::Usage;
