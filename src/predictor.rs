//! Criticality trend prediction and the geometry switch trigger.
//!
//! The forecast is a one-step linear extrapolation of the end-of-step
//! multiplication factor: the mean absolute drop over the last three steps
//! is subtracted from the latest value.

use crate::error::PredictionError;

/// Fewest end-of-step values a forecast can be made from.
pub const MIN_HISTORY: usize = 4;

/// Differences averaged into the expected drop.
const TREND_WINDOW: usize = 3;

/// One-step-ahead extrapolation of the multiplication factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CriticalityForecast {
    /// Latest end-of-step value.
    pub last: f64,
    /// Mean absolute change over the last three steps.
    pub average_drop: f64,
}

impl CriticalityForecast {
    /// Extrapolated value at the end of the next step.
    #[must_use]
    pub fn predicted(&self) -> f64 {
        self.last - self.average_drop
    }

    /// Returns true if the next step is expected to end subcritical.
    #[must_use]
    pub fn subcritical(&self) -> bool {
        self.predicted() < 1.0
    }
}

/// Builds the forecast from the end-of-step history, oldest first.
///
/// # Errors
///
/// Returns `PredictionError::InsufficientHistory` with fewer than
/// [`MIN_HISTORY`] values.
pub fn forecast(keff_eds: &[f64]) -> Result<CriticalityForecast, PredictionError> {
    if keff_eds.len() < MIN_HISTORY {
        return Err(PredictionError::InsufficientHistory {
            required: MIN_HISTORY,
            found: keff_eds.len(),
        });
    }

    let tail = &keff_eds[keff_eds.len() - (TREND_WINDOW + 1)..];
    let total: f64 = tail.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    #[allow(clippy::cast_precision_loss)]
    let average_drop = total / TREND_WINDOW as f64;

    Ok(CriticalityForecast {
        last: tail[TREND_WINDOW],
        average_drop,
    })
}

/// Returns true if the next step is expected to end subcritical.
///
/// # Errors
///
/// Same as [`forecast`].
pub fn predict_next_step_subcritical(keff_eds: &[f64]) -> Result<bool, PredictionError> {
    let f = forecast(keff_eds)?;
    tracing::info!(
        average_drop = f.average_drop,
        last = f.last,
        predicted = f.predicted(),
        "Criticality forecast"
    );
    Ok(f.subcritical())
}

/// Returns true if `current_time` is one of the scheduled switch times.
///
/// Times are compared exactly.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn should_switch_geometry(current_time: f64, scheduled: &[f64]) -> bool {
    scheduled.iter().any(|&t| t == current_time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declining_history_predicts_subcritical() {
        let f = forecast(&[1.05, 1.04, 1.02, 1.00]).unwrap();
        assert!((f.average_drop - 0.016_666_666).abs() < 1e-6);
        assert!(f.subcritical());
    }

    #[test]
    fn test_only_last_three_steps_count() {
        // A large early drop must not dominate the trend.
        let f = forecast(&[1.50, 1.10, 1.09, 1.08, 1.07]).unwrap();
        assert!((f.average_drop - 0.01).abs() < 1e-9);
        assert!(!f.subcritical());
    }

    #[test]
    fn test_rising_history_uses_magnitude() {
        let f = forecast(&[0.99, 1.00, 1.01, 1.02]).unwrap();
        assert!((f.predicted() - 1.01).abs() < 1e-9);
        assert!(!predict_next_step_subcritical(&[0.99, 1.00, 1.01, 1.02]).unwrap());
    }

    #[test]
    fn test_short_history_is_an_error() {
        let err = forecast(&[1.05, 1.04, 1.02]).unwrap_err();
        assert!(matches!(err, PredictionError::InsufficientHistory { required: 4, found: 3 }));
    }

    #[test]
    fn test_geometry_switch_exact_match() {
        let schedule = [10.0, 20.0];
        assert!(should_switch_geometry(20.0, &schedule));
        assert!(!should_switch_geometry(15.0, &schedule));
        assert!(!should_switch_geometry(20.000_001, &schedule));
        assert!(!should_switch_geometry(1.0, &[]));
    }
}
