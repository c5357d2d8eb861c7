//! Stowage management for a space station.
//!
//! The core places cargo items into containers, plans retrievals past
//! blocking items, simulates usage and expiry, and plans the return of waste.
//! All engines operate on an explicit [`station::StationState`] owned by the
//! caller; the [`api`] module exposes them over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod geometry;
pub mod lifecycle;
pub mod model;
pub mod placement;
pub mod rearrangement;
pub mod retrieval;
pub mod spatial;
pub mod station;
pub mod types;
pub mod waste;

pub use error::{ErrorKind, Result, StowageError};
pub use station::StationState;
