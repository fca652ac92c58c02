//! Core system types and foundations
//!
//! Type definitions, error handling and configuration shared by every other module.

pub mod types;
pub mod error;
pub mod config;

// Re-export commonly used items
pub use types::{Role, SlotEvent, SlotReceipt, Widget, WorkerId};
pub use error::{BufferError, Error, Result};
pub use config::Config;
