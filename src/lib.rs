//! Policy iteration for the Barto and Sutton car rental problem.
//!
//! Two lots rent out cars and take returns with Poisson-distributed demand.
//! Each night up to `max_move` cars can be moved between the lots at a cost.
//! [`solver::CarRental`] computes the policy that maximizes expected
//! discounted revenue.

pub mod cars;
pub mod config;
pub mod error;
pub mod export;
pub mod policy;
pub mod solver;

pub use config::RentalConfig;
pub use error::{RentalError, Result};
pub use solver::{Action, CarRental, State};
