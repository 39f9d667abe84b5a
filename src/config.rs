use std::path::Path;

use config_file::FromConfigFile;
use serde::Deserialize;

use crate::error::{RentalError, Result};

/// Parameters of the car rental problem, read from a TOML file.
///
/// Every field has a default, so an empty file describes the textbook
/// problem: 20 cars per lot, at most 5 moved overnight, $10 per rental,
/// $2 per car moved, gamma = 0.9.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RentalConfig {
    /// Maximum number of cars that fit on either lot
    pub max_cars: u8,
    /// Maximum number of cars moved between lots overnight
    pub max_move: u8,
    /// Revenue earned per car rented
    pub rental_revenue: f64,
    /// Cost per car moved overnight
    pub move_cost: f64,
    /// Expected number of rental requests per day at location #1
    pub rent_mean1: f64,
    /// Expected number of cars returned per day at location #1
    pub return_mean1: f64,
    /// Expected number of rental requests per day at location #2
    pub rent_mean2: f64,
    /// Expected number of cars returned per day at location #2
    pub return_mean2: f64,
    /// Discount rate
    pub gamma: f64,
    /// Policy evaluation stops once the largest value change is below theta
    pub theta: f64,
    /// Sweep cap for a single policy evaluation
    pub max_sweeps: usize,
    /// Round cap for policy iteration
    pub max_rounds: usize,
}

impl Default for RentalConfig {
    fn default() -> Self {
        RentalConfig {
            max_cars: 20,
            max_move: 5,
            rental_revenue: 10.0,
            move_cost: 2.0,
            rent_mean1: 3.0,
            return_mean1: 3.0,
            rent_mean2: 4.0,
            return_mean2: 2.0,
            gamma: 0.9,
            theta: 1e-3,
            max_sweeps: 1000,
            max_rounds: 100,
        }
    }
}

impl RentalConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<RentalConfig> {
        let config = RentalConfig::from_config_file(path).map_err(|source| {
            RentalError::ConfigFile { path: path.display().to_string(), source }
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let means = [
            ("rent_mean1", self.rent_mean1),
            ("return_mean1", self.return_mean1),
            ("rent_mean2", self.rent_mean2),
            ("return_mean2", self.return_mean2),
        ];
        for (name, mean) in means {
            if !(mean.is_finite() && mean > 0.0) {
                return Err(invalid(format!("{name} must be positive, got {mean}")));
            }
        }
        if !(0.0..1.0).contains(&self.gamma) {
            return Err(invalid(format!("gamma must be in [0, 1), got {}", self.gamma)));
        }
        if !(self.theta.is_finite() && self.theta > 0.0) {
            return Err(invalid(format!("theta must be positive, got {}", self.theta)));
        }
        if self.max_move > self.max_cars || self.max_move > i8::MAX as u8 {
            return Err(invalid(format!(
                "max_move ({}) must not exceed max_cars ({}) or {}",
                self.max_move,
                self.max_cars,
                i8::MAX
            )));
        }
        if !(self.rental_revenue.is_finite() && self.move_cost.is_finite()) {
            return Err(invalid("rental_revenue and move_cost must be finite".to_string()));
        }
        if self.max_sweeps == 0 || self.max_rounds == 0 {
            return Err(invalid("max_sweeps and max_rounds must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Largest request or return count kept in the truncated Poisson domain.
    pub fn max_count(&self) -> usize {
        self.max_cars as usize + self.max_move as usize
    }
}

fn invalid(msg: String) -> RentalError {
    RentalError::InvalidConfig(msg)
}
