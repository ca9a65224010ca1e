//! Types library for the lap event engine
//!
//! Core type definitions shared by every service that reads or writes runner
//! and lap data, so that the stored document shapes are defined once.
//!
//! # Modules
//! - `ids`: Identifiers (RunnerId, LapId)
//! - `runner`: Runner profiles and their stored document shape
//! - `lap`: Lap records and their stored document shape
//! - `settings`: Event-wide settings from the remote config
//! - `errors`: Error taxonomy

pub mod ids;
pub mod runner;
pub mod lap;
pub mod settings;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::runner::*;
    pub use crate::lap::*;
    pub use crate::settings::*;
    pub use crate::errors::*;
}
