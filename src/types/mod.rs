//! Shared types for Vestibule

pub mod error;

pub use error::{Result, VestibuleError};
