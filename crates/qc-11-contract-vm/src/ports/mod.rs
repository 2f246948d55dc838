//! # Ports Layer (Middle Hexagon)
//!
//! Trait definitions between the engine and the outside world.
//!
//! ## Architecture Compliance
//!
//! - **Driving Ports (Inbound)**: `ContractExecutionApi`
//! - **Driven Ports (Outbound)**: `Repository`, `BlockStore`
//! - No concrete implementations in this module

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
