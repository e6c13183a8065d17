//! Anomaly Classifier
//!
//! Compares a new reading against its rolling baseline band
//! `[mean - k*σ, mean + k*σ]`. Boundary values are normal.

use serde::Serialize;

use crate::logic::baseline::{Baseline, BaselineOutcome};

/// Band a reading was judged against
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub mean: f64,
    pub std_dev: f64,
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub fn new(baseline: &Baseline, multiplier: f64) -> Self {
        let spread = multiplier * baseline.std_dev;
        Self {
            mean: baseline.mean,
            std_dev: baseline.std_dev,
            lower: baseline.mean - spread,
            upper: baseline.mean + spread,
        }
    }
}

/// Classifier decision
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub is_anomaly: bool,
    /// None when no baseline was available
    pub bounds: Option<Bounds>,
}

impl Classification {
    fn normal_without_baseline() -> Self {
        Self {
            is_anomaly: false,
            bounds: None,
        }
    }
}

/// Judge `value` against `outcome`.
///
/// - no baseline: never anomalous
/// - flat history (σ == 0): anomalous iff `value != mean`
/// - otherwise: anomalous iff outside the closed band
pub fn classify(value: f64, outcome: &BaselineOutcome, multiplier: f64) -> Classification {
    let baseline = match outcome.baseline() {
        Some(b) => b,
        None => return Classification::normal_without_baseline(),
    };

    let bounds = Bounds::new(baseline, multiplier);

    let is_anomaly = if baseline.std_dev == 0.0 {
        value != baseline.mean
    } else {
        value < bounds.lower || value > bounds.upper
    };

    Classification {
        is_anomaly,
        bounds: Some(bounds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn available(values: &[f64]) -> BaselineOutcome {
        BaselineOutcome::Available(Baseline::from_values(values).unwrap())
    }

    #[test]
    fn test_no_baseline_is_never_anomalous() {
        let insufficient = BaselineOutcome::InsufficientHistory { have: 3, need: 100 };
        let unavailable = BaselineOutcome::Unavailable { reason: "down".into() };

        for value in [-1e9, 0.0, 20.0, 1e9] {
            assert!(!classify(value, &insufficient, 2.0).is_anomaly);
            assert!(!classify(value, &unavailable, 2.0).is_anomaly);
        }
        assert_eq!(classify(5.0, &insufficient, 2.0).bounds, None);
    }

    #[test]
    fn test_flat_history() {
        let flat = available(&[20.0; 10]);
        assert!(!classify(20.0, &flat, 2.0).is_anomaly);
        assert!(classify(20.01, &flat, 2.0).is_anomaly);
        assert!(classify(19.99, &flat, 2.0).is_anomaly);
    }

    #[test]
    fn test_band_is_closed() {
        // mean = 2, sample σ = 1
        let outcome = available(&[1.0, 2.0, 3.0]);
        let bounds = classify(2.0, &outcome, 2.0).bounds.unwrap();
        assert_eq!(bounds.lower, 0.0);
        assert_eq!(bounds.upper, 4.0);

        assert!(!classify(4.0, &outcome, 2.0).is_anomaly);
        assert!(!classify(0.0, &outcome, 2.0).is_anomaly);
        assert!(!classify(3.9, &outcome, 2.0).is_anomaly);
        assert!(classify(4.0001, &outcome, 2.0).is_anomaly);
        assert!(classify(-0.0001, &outcome, 2.0).is_anomaly);
    }

    #[test]
    fn test_scenario_window_of_five() {
        // mean 20, sample σ = sqrt(0.5) ≈ 0.707, k = 2 → band ≈ [18.586, 21.414]
        let outcome = available(&[20.0, 21.0, 19.0, 20.0, 20.0]);

        let inside = classify(21.0, &outcome, 2.0);
        assert!(!inside.is_anomaly);

        let high = classify(25.0, &outcome, 2.0);
        assert!(high.is_anomaly);
        let bounds = high.bounds.unwrap();
        assert_eq!(bounds.mean, 20.0);
        assert!((bounds.std_dev - 0.5f64.sqrt()).abs() < 1e-12);
        assert!((bounds.upper - (20.0 + 2.0 * 0.5f64.sqrt())).abs() < 1e-12);

        // 21.5 lies just above the upper bound
        assert!(classify(21.5, &outcome, 2.0).is_anomaly);
        // and inside once the band is widened
        assert!(!classify(21.5, &outcome, 3.0).is_anomaly);
    }

    #[test]
    fn test_multiplier_widens_band() {
        let outcome = available(&[10.0, 12.0, 14.0]);
        assert!(classify(15.0, &outcome, 1.0).is_anomaly);
        assert!(!classify(15.0, &outcome, 2.0).is_anomaly);
    }
}
