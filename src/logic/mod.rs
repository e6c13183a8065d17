//! Logic Module - Detection engine
//!
//! ## Layout
//! - `reading` - typed Reading / Alert records
//! - `baseline/` - Rolling Statistics Engine
//! - `classifier` - Anomaly Classifier
//! - `params` - operator-tunable detection parameters
//! - `consumer` - Consumer-Group Processing Loop
//! - `detector` - anomaly handler plugged into the loop
//! - `alert_watch` - alert-printing handler

// Records & statistics
pub mod reading;
pub mod baseline;
pub mod classifier;
pub mod params;

// Processing
pub mod consumer;
pub mod detector;
pub mod alert_watch;

// Runtime support
pub mod retry;
pub mod shutdown;
