use serde::{Deserialize, Serialize};

// ============================================================================
// BASELINE
// ============================================================================

/// Rolling statistics over a device's most recent historical readings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    /// Sample standard deviation (N-1 denominator); 0 when fewer than 2 points
    pub std_dev: f64,
    pub sample_count: usize,
}

impl Baseline {
    /// Compute mean and sample standard deviation of `values`.
    ///
    /// Returns `None` for an empty slice.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let n = values.len();
        if n == 0 {
            return None;
        }

        let mean = values.iter().sum::<f64>() / n as f64;

        // Two-pass: squared deviations from the settled mean
        let std_dev = if n >= 2 {
            let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (sum_sq / (n - 1) as f64).sqrt()
        } else {
            0.0
        };

        Some(Self {
            mean,
            std_dev,
            sample_count: n,
        })
    }
}

// ============================================================================
// OUTCOME
// ============================================================================

/// Result of asking for a device's baseline
#[derive(Debug, Clone, PartialEq)]
pub enum BaselineOutcome {
    Available(Baseline),
    /// Fewer stored readings than the window requires
    InsufficientHistory { have: usize, need: usize },
    /// Store failed or returned data that could not be used
    Unavailable { reason: String },
}

impl BaselineOutcome {
    /// The baseline, if one could be computed
    pub fn baseline(&self) -> Option<&Baseline> {
        match self {
            BaselineOutcome::Available(b) => Some(b),
            _ => None,
        }
    }
}
