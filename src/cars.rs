use std::cmp;

use log::trace;
use statrs::distribution::{Discrete, Poisson};

use crate::error::{RentalError, Result};

/// Poisson probabilities for a single rate, cached over a truncated domain.
///
/// `pmf[k]` holds p(k; lambda) for k in `0..=max_count`. The table is filled
/// once at construction and never changes afterwards.
#[derive(Debug, Clone)]
pub struct PoissonTable {
    pub lambda: f64,
    dist: Poisson,
    pmf: ndarray::Array1<f64>,
}

impl PoissonTable {
    pub fn new(lambda: f64, max_count: usize) -> Result<PoissonTable> {
        let dist = Poisson::new(lambda).map_err(|e| {
            RentalError::InvalidConfig(format!("Poisson rate {lambda}: {e}"))
        })?;
        let pmf = ndarray::Array1::from_shape_fn(max_count + 1, |k| dist.pmf(k as u64));
        Ok(PoissonTable { lambda, dist, pmf })
    }

    /// Probability of exactly `k` requests or returns.
    ///
    /// Counts past the cached domain are computed on the spot.
    pub fn prob(&self, k: i64) -> Result<f64> {
        if k < 0 {
            return Err(RentalError::Domain(k));
        }
        let k = k as usize;
        Ok(match self.pmf.get(k) {
            Some(p) => *p,
            None => self.dist.pmf(k as u64),
        })
    }

    /// Largest count held in the cache.
    pub fn max_count(&self) -> usize {
        self.pmf.len() - 1
    }

    /// Total probability mass inside the cached domain.
    pub fn mass(&self) -> f64 {
        self.pmf.sum()
    }

    pub fn pmf(&self) -> ndarray::ArrayView1<'_, f64> {
        self.pmf.view()
    }
}


/// Expected rewards and overnight transition probabilities for one location.
///
/// Indices to `reward` are [cars on lot at start of rental day].
/// Indices to `probs` are [cars on lot in the morning, cars on lot next morning].
/// Both are computed from the request and return rates when the model is
/// built and are read-only afterwards.
#[derive(Debug, Clone)]
pub struct TransitionModel {
    /// Maximum number of cars the lot can hold
    pub max_cars: u8,
    /// Rental request probabilities
    pub requests: PoissonTable,
    /// Car return probabilities
    pub returns: PoissonTable,
    /// Expected rental revenue. Index: cars on lot
    pub reward: ndarray::Array1<f64>,
    /// Overnight transition probabilities. Indexes: cars today, cars tomorrow
    pub probs: ndarray::Array2<f64>,
}

impl TransitionModel {
    /// Build the model for a lot holding at most `max_cars` cars.
    ///
    /// Requests and returns are truncated to `0..=max_count`. Cars left over
    /// after rentals plus cars returned are clamped to the lot size.
    pub fn build(
        rent_mean: f64,
        return_mean: f64,
        max_cars: u8,
        max_count: usize,
        rental_revenue: f64,
    ) -> Result<TransitionModel> {
        let requests = PoissonTable::new(rent_mean, max_count)?;
        let returns = PoissonTable::new(return_mean, max_count)?;
        let dim = max_cars as usize + 1;
        let mut reward = ndarray::Array1::<f64>::zeros(dim);
        let mut probs = ndarray::Array2::<f64>::zeros((dim, dim));

        for (x, p_x) in requests.pmf().iter().enumerate() {
            for n in 0..dim {
                // Can't rent more cars than what's on the lot.
                let rented = cmp::min(x, n);
                reward[n] += p_x * rental_revenue * rented as f64;
                for (y, p_y) in returns.pmf().iter().enumerate() {
                    let next = cmp::min(n - rented + y, max_cars as usize);
                    probs[[n, next]] += p_x * p_y;
                }
            }
        }
        trace!(
            "Built transition model: rent mean {}, return mean {}, {} states",
            rent_mean, return_mean, dim
        );

        Ok(TransitionModel { max_cars, requests, returns, reward, probs })
    }

    fn check_count(&self, count: usize) -> Result<()> {
        if count <= self.max_cars as usize {
            Ok(())
        } else {
            Err(RentalError::InvalidLotCount { count, max_cars: self.max_cars })
        }
    }

    /// Expected revenue with `n` cars available.
    pub fn expected_reward(&self, n: usize) -> Result<f64> {
        self.check_count(n)?;
        Ok(self.reward[n])
    }

    /// Probability that `n` cars in the morning become `next` cars the following morning.
    pub fn transition(&self, n: usize, next: usize) -> Result<f64> {
        self.check_count(n)?;
        self.check_count(next)?;
        Ok(self.probs[[n, next]])
    }

    fn show_array(arr: &ndarray::Array2<f64>) {
        print!("   cars today:");
        for n in 0..arr.dim().0 {
            print!("{:9}", n);
        }
        println!();
        for (next, col) in arr.columns().into_iter().enumerate() {
            print!("tomorrow: {next:>3} | ");
            for elem in col.iter() {
                print!("{:8.4} ", elem);
            }
            println!();
        }
    }

    /// Print the expected rewards and transition table.
    pub fn show(&self) {
        print!("  cars on lot:");
        for n in 0..self.reward.len() {
            print!("{:9}", n);
        }
        println!();
        print!("      reward: | ");
        for r in self.reward.iter() {
            print!("{:8.4} ", r);
        }
        println!();
        println!();
        TransitionModel::show_array(&self.probs);
    }
}
