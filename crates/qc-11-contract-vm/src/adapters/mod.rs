//! # Adapters Layer (Outer Hexagon)
//!
//! In-process implementations of the driven ports.
//!
//! ## Architecture Compliance
//!
//! - Adapters implement domain ports
//! - The engine only sees the `Repository` and `BlockStore` traits

pub mod overlay;
pub mod state_adapter;

pub use overlay::{AccountState, LayeredState};
pub use state_adapter::*;
