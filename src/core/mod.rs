//! Core domain abstractions: error taxonomy and shared value types.
//!
//! Kept free of any subsystem-specific logic so every other module can
//! depend on it without creating cycles.

pub mod error;
pub mod types;

pub use error::{DecodeError, HarvesterError, HarvesterResult, RpcError, StreamError};
pub use types::{AccountUpdate, BlockInfo, LifecycleChange, Side};
