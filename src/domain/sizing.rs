//! Position sizing and exit thresholds.

use super::error::DashtraderError;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_STARTING_BALANCE: f64 = 30_000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SizingParams {
    /// Largest single position as a fraction of equity.
    pub max_position_size: f64,
    /// Increment for strategies that scale in gradually. Target sizing
    /// itself always fills the whole gap to the target.
    pub position_step_size: f64,
    /// Cap on summed long and short exposure.
    pub max_total_exposure: f64,
    /// Do not add to a position whose P&L is below this.
    pub add_loss_threshold: f64,
    pub stop_loss_pct: f64,
    pub stagnant_days: i64,
    pub stagnant_band: f64,
    pub long_exit_score: f64,
    pub short_exit_score: f64,
    pub momentum_threshold: f64,
}

impl Default for SizingParams {
    fn default() -> Self {
        SizingParams {
            max_position_size: 0.08,
            position_step_size: 0.02,
            max_total_exposure: 1.6,
            add_loss_threshold: -0.02,
            stop_loss_pct: -0.04,
            stagnant_days: 5,
            stagnant_band: 0.01,
            long_exit_score: 0.4,
            short_exit_score: 0.6,
            momentum_threshold: 0.02,
        }
    }
}

impl SizingParams {
    /// Reads the `[sizing]` section, falling back to defaults per key.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, DashtraderError> {
        let d = SizingParams::default();
        let params = SizingParams {
            max_position_size: config.get_double("sizing", "max_position_size", d.max_position_size),
            position_step_size: config.get_double(
                "sizing",
                "position_step_size",
                d.position_step_size,
            ),
            max_total_exposure: config.get_double(
                "sizing",
                "max_total_exposure",
                d.max_total_exposure,
            ),
            add_loss_threshold: config.get_double(
                "sizing",
                "add_loss_threshold",
                d.add_loss_threshold,
            ),
            stop_loss_pct: config.get_double("sizing", "stop_loss_pct", d.stop_loss_pct),
            stagnant_days: config.get_int("sizing", "stagnant_days", d.stagnant_days),
            stagnant_band: config.get_double("sizing", "stagnant_band", d.stagnant_band),
            long_exit_score: config.get_double("sizing", "long_exit_score", d.long_exit_score),
            short_exit_score: config.get_double("sizing", "short_exit_score", d.short_exit_score),
            momentum_threshold: config.get_double(
                "sizing",
                "momentum_threshold",
                d.momentum_threshold,
            ),
        };
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<(), DashtraderError> {
        let invalid = |key: &str, reason: &str| DashtraderError::ConfigInvalid {
            section: "sizing".into(),
            key: key.into(),
            reason: reason.into(),
        };
        if !(self.max_position_size > 0.0 && self.max_position_size <= 1.0) {
            return Err(invalid("max_position_size", "must be in (0, 1]"));
        }
        if self.max_total_exposure <= 0.0 {
            return Err(invalid("max_total_exposure", "must be positive"));
        }
        if self.stop_loss_pct >= 0.0 {
            return Err(invalid("stop_loss_pct", "must be negative"));
        }
        if self.stagnant_days < 0 {
            return Err(invalid("stagnant_days", "must not be negative"));
        }
        Ok(())
    }
}
