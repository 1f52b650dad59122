//! # Swivel Common Library
//!
//! Shared code for the Swivel discovery services including:
//! - Sighting record model (devices, places, sightings, links, relocations)
//! - Database initialization and schema
//! - Event types (SwivelEvent enum) and the topic EventBus
//! - Bootstrap configuration loading
//! - Time helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{EventBus, SwivelEvent, Topic};
