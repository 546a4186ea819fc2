//! Shared types for the code review gateway

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
