//! # Domain Layer (Inner Hexagon)
//!
//! Pure types and rules of contract execution.
//! NO I/O, NO async.
//!
//! ## Architecture Compliance
//!
//! - This is the **inner layer** of the hexagonal architecture.
//! - Dependencies point INWARD only (the engine and adapters depend on this).

pub mod entities;
pub mod invariants;
pub mod result;
pub mod services;
pub mod value_objects;
pub mod word;

pub use entities::*;
pub use invariants::*;
pub use result::*;
pub use services::*;
pub use value_objects::*;
pub use word::*;
