//! Sensor Stream Core
//!
//! Consumer-group anomaly detection over sensor reading streams.
//!
//! ```text
//! ┌──────────────┐  pull   ┌──────────────┐ baseline ┌──────────────┐
//! │  Stream Log  │ ──────→ │ ConsumerLoop │ ───────→ │ Time-Series  │
//! │ (Redis       │ ←────── │  + Detector  │ ←─────── │ Store        │
//! │  Streams)    │   ack   └──────┬───────┘  persist └──────────────┘
//! └──────────────┘                │ alert
//!                                 ▼
//!                         ┌──────────────┐
//!                         │ anomaly_     │
//!                         │ alerts       │
//!                         └──────────────┘
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logic;
pub mod store;

pub use config::{Config, ConsumerConfig};
pub use error::{DecodeError, ProcessError, StoreError, StoreResult};
