//! swivel-scan - Discovery & identity-correlation engine
//!
//! Continuously discovers nearby short-range radio devices, resolves their
//! identity across address rotation using GATT signatures, attributes each
//! sighting to a place, and publishes the resulting facts on the EventBus.
//!
//! Data flow: radio → [`ScanEngine`] → [`IdentityResolver`] →
//! [`PlaceLinker`] → [`SightingStore`] → EventBus → subscribers.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod identity;
pub mod location;
pub mod place_linker;
pub mod radio;
pub mod reports;

pub use crate::config::ScanSettings;
pub use crate::db::SightingStore;
pub use crate::engine::{PassSummary, ScanEngine};
pub use crate::error::{RadioError, Result, ScanError};
pub use crate::identity::{IdentityMatch, IdentityResolver, Resolution};
pub use crate::place_linker::{PlaceLink, PlaceLinker};
