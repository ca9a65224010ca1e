//! Lap Event Engine
//!
//! Turns the live lap and runner collections of a 24-hour charity run into:
//! - A lap count per runner
//! - A strictly ordered ranking with deterministic tie-breaking
//! - Class/house/name filtered leaderboards that keep global positions
//! - Hourly lap histograms and per-house/per-class sums and averages
//! - Sequential start numbers for walk-in runners
//!
//! Every derived view is recomputed from the full snapshot on each change,
//! so replaying a snapshot never changes the result.
//!
//! # Architecture
//!
//! ```text
//!              DocumentStore
//!                    │
//!             ┌──────▼──────┐
//!             │  StreamHub  │  ← Versioned, deduplicated live queries
//!             └──┬───────┬──┘
//!                │       │
//!        ┌───────▼─┐ ┌───▼─────────────┐
//!        │LapBoard │ │ RunnerDirectory │
//!        │counts + │ │ profiles +      │
//!        │ranking  │ │ start numbers   │
//!        └───────┬─┘ └───┬─────────────┘
//!                │       │
//!        ┌───────▼───────▼───────┐
//!        │ LapEngine (read joins)│
//!        └───┬───────────────┬───┘
//!            │               │
//!       ┌────▼───┐      ┌────▼────┐
//!       │ Filter │      │  Stats  │
//!       └────────┘      └─────────┘
//! ```

pub mod aggregator;
pub mod board;
pub mod clock;
pub mod config;
pub mod directory;
pub mod engine;
pub mod events;
pub mod filter;
pub mod histogram;
pub mod load_state;
pub mod metrics;
pub mod ranking;
pub mod stats;
pub mod store;
pub mod stream;

pub use engine::{EngineConfig, EngineError, LapEngine};
pub use load_state::LoadState;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
