//! Detection Parameters
//!
//! `window_size` and `std_dev_multiplier` live in the external Parameter
//! Store. The detector reads them once per pulled batch and passes the value
//! object down explicitly; nothing here is global.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{DEFAULT_STD_DEV_MULTIPLIER, DEFAULT_WINDOW_SIZE};

pub const WINDOW_SIZE_FIELD: &str = "window_size";
pub const MULTIPLIER_FIELD: &str = "std_dev_multiplier";

/// Detection Parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// Historical readings per baseline (> 0)
    pub window_size: usize,

    /// Band half-width in standard deviations (> 0)
    pub std_dev_multiplier: f64,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            std_dev_multiplier: DEFAULT_STD_DEV_MULTIPLIER,
        }
    }
}

/// Rejected operator input
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamsError {
    #[error("window_size must be a positive integer, got {0}")]
    InvalidWindowSize(String),

    #[error("std_dev_multiplier must be a positive finite number, got {0}")]
    InvalidMultiplier(String),
}

impl Parameters {
    /// Validated constructor for the operator write path
    pub fn new(window_size: usize, std_dev_multiplier: f64) -> Result<Self, ParamsError> {
        if window_size == 0 {
            return Err(ParamsError::InvalidWindowSize(window_size.to_string()));
        }
        if !std_dev_multiplier.is_finite() || std_dev_multiplier <= 0.0 {
            return Err(ParamsError::InvalidMultiplier(std_dev_multiplier.to_string()));
        }
        Ok(Self {
            window_size,
            std_dev_multiplier,
        })
    }

    /// Read from the stored hash; unset or invalid fields fall back to defaults
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let defaults = Self::default();

        let window_size = match fields.get(WINDOW_SIZE_FIELD) {
            None => defaults.window_size,
            Some(raw) => match parse_window_size(raw) {
                Some(n) => n,
                None => {
                    warn!(field = WINDOW_SIZE_FIELD, value = %raw, "Invalid parameter, using default");
                    defaults.window_size
                }
            },
        };

        let std_dev_multiplier = match fields.get(MULTIPLIER_FIELD) {
            None => defaults.std_dev_multiplier,
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(k) if k.is_finite() && k > 0.0 => k,
                _ => {
                    warn!(field = MULTIPLIER_FIELD, value = %raw, "Invalid parameter, using default");
                    defaults.std_dev_multiplier
                }
            },
        };

        Self {
            window_size,
            std_dev_multiplier,
        }
    }

    /// Hash fields as written by the operator path
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            (WINDOW_SIZE_FIELD.to_string(), self.window_size.to_string()),
            (MULTIPLIER_FIELD.to_string(), self.std_dev_multiplier.to_string()),
        ]
    }
}

/// Dashboards may write the window as "100" or "100.0"
fn parse_window_size(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<usize>() {
        return (n > 0).then_some(n);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 1.0 && f.fract() == 0.0 => Some(f as usize),
        _ => None,
    }
}
