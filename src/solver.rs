use std::cmp;
use std::fmt;

use log::info;
use ndarray::{Array2, ArrayView2};

use crate::cars::TransitionModel;
use crate::config::RentalConfig;
use crate::error::{RentalError, Result};
use crate::policy;

/// Number of cars moved overnight. Positive moves cars from site #1 to site #2.
pub type Action = i8;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct State {
    pub n1: u8,  // Number of cars at site #1 at start of day
    pub n2: u8,  // Number of cars at site #2 at start of day
}

impl State {
    pub fn new(n1: u8, n2: u8) -> State {
        State { n1, n2 }
    }

    /// Index into the value table and policy arrays.
    pub fn index(&self) -> [usize; 2] {
        [self.n1 as usize, self.n2 as usize]
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(n1: {}, n2: {})", self.n1, self.n2)
    }
}

/// Visits every state in row-major order: (0, 0), (0, 1), ..., (max_n1, max_n2).
pub struct StateIterator {
    n1: u8,
    n2: u8,
    max_n1: u8,
    max_n2: u8,
    done: bool,
}

impl StateIterator {
    pub fn new(max_n1: u8, max_n2: u8) -> StateIterator {
        StateIterator { n1: 0, n2: 0, max_n1, max_n2, done: false }
    }
}

impl Iterator for StateIterator {
    type Item = State;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let state = State { n1: self.n1, n2: self.n2 };
        if self.n2 < self.max_n2 {
            self.n2 += 1;
        } else if self.n1 < self.max_n1 {
            self.n2 = 0;
            self.n1 += 1;
        } else {
            self.done = true;
        }
        Some(state)
    }
}


/// Problem dynamics: the configuration plus one transition model per location.
///
/// Immutable once built. Policy evaluation and improvement both read it
/// through a shared reference.
#[derive(Debug, Clone)]
pub struct Dynamics {
    pub config: RentalConfig,
    pub loc1: TransitionModel,
    pub loc2: TransitionModel,
}

impl Dynamics {
    /// Validate the configuration and build both location models.
    pub fn new(config: RentalConfig) -> Result<Dynamics> {
        config.validate()?;
        let max_count = config.max_count();
        let (loc1, loc2) = rayon::join(
            || TransitionModel::build(
                config.rent_mean1, config.return_mean1,
                config.max_cars, max_count, config.rental_revenue),
            || TransitionModel::build(
                config.rent_mean2, config.return_mean2,
                config.max_cars, max_count, config.rental_revenue),
        );
        Ok(Dynamics { loc1: loc1?, loc2: loc2?, config })
    }

    /// Number of states along each axis.
    pub fn dim(&self) -> usize {
        self.config.max_cars as usize + 1
    }

    pub fn states(&self) -> StateIterator {
        StateIterator::new(self.config.max_cars, self.config.max_cars)
    }

    /// State at a row-major position, the inverse of walking `states()`.
    pub fn state_at(&self, i: usize) -> State {
        let dim = self.dim();
        State { n1: (i / dim) as u8, n2: (i % dim) as u8 }
    }

    pub fn check_state(&self, state: &State) -> Result<()> {
        self.check_counts(state.n1 as i32, state.n2 as i32)
    }

    fn check_counts(&self, n1: i32, n2: i32) -> Result<()> {
        let max_cars = self.config.max_cars;
        let range = 0..=max_cars as i32;
        if range.contains(&n1) && range.contains(&n2) {
            Ok(())
        } else {
            Err(RentalError::InvalidState { n1, n2, max_cars })
        }
    }

    /// Bounds on feasible actions for a state, inclusive.
    ///
    /// Can't move more than max_move, can't move more cars than are on the
    /// source lot and can't overfill the destination lot.
    fn action_bounds(&self, state: &State) -> (i32, i32) {
        let max_cars = self.config.max_cars as i32;
        let max_move = self.config.max_move as i32;
        let (n1, n2) = (state.n1 as i32, state.n2 as i32);
        let low = cmp::max(-max_move, cmp::max(-n2, n1 - max_cars));
        let high = cmp::min(max_move, cmp::min(n1, max_cars - n2));
        (low, high)
    }

    /// Clamp a proposed action so it is feasible for `state`.
    pub fn get_valid_action(&self, state: &State, action: i32) -> Result<Action> {
        self.check_state(state)?;
        let (low, high) = self.action_bounds(state);
        Ok(action.clamp(low, high) as Action)
    }

    /// Feasible actions for `state` in ascending order.
    pub fn get_available_actions(&self, state: &State) -> Result<Vec<Action>> {
        self.check_state(state)?;
        let (low, high) = self.action_bounds(state);
        Ok((low..=high).map(|a| a as Action).collect())
    }

    /// Expected rental revenue for the day starting in `state`.
    pub fn get_reward(&self, state: &State) -> Result<f64> {
        self.check_state(state)?;
        Ok(self.loc1.expected_reward(state.n1 as usize)?
            + self.loc2.expected_reward(state.n2 as usize)?)
    }

    /// Probability of moving from morning `state` to `next` by the following morning.
    pub fn transition_probability(&self, state: &State, next: &State) -> Result<f64> {
        self.check_state(state)?;
        self.check_state(next)?;
        Ok(self.loc1.transition(state.n1 as usize, next.n1 as usize)?
            * self.loc2.transition(state.n2 as usize, next.n2 as usize)?)
    }

    /// Move `action` cars overnight and return the morning state with its
    /// expected reward.
    ///
    /// The reward is the closed-form expectation, not a sampled outcome, and
    /// does not include the moving cost.
    pub fn step(&self, state: &State, action: Action) -> Result<(State, f64)> {
        self.check_state(state)?;
        let n1 = state.n1 as i32 - action as i32;
        let n2 = state.n2 as i32 + action as i32;
        self.check_counts(n1, n2)?;
        let morning = State::new(n1 as u8, n2 as u8);
        let reward = self.get_reward(&morning)?;
        Ok((morning, reward))
    }

    /// One-step expected discounted value of taking `action` in `state`:
    /// V(s) = -cost * |a| + R(s') + gamma * sum p(s'' | s') * V(s'')
    ///
    /// The action is clamped to feasibility first.
    pub fn bellman_expectation(
        &self,
        state: &State,
        action: i32,
        values: &ArrayView2<f64>,
    ) -> Result<f64> {
        let action = self.get_valid_action(state, action)?;
        let (morning, reward) = self.step(state, action)?;
        let p1 = self.loc1.probs.row(morning.n1 as usize);
        let p2 = self.loc2.probs.row(morning.n2 as usize);

        let mut future = 0.0;
        for (next_n1, p_n1) in p1.iter().enumerate() {
            if *p_n1 == 0.0 {
                continue;
            }
            let row = values.row(next_n1);
            let inner: f64 = p2.iter().zip(row.iter()).map(|(p, v)| p * v).sum();
            future += p_n1 * inner;
        }

        let move_cost = self.config.move_cost * (action as f64).abs();
        Ok(-move_cost + reward + self.config.gamma * future)
    }
}


/// Stage of policy iteration reported to an observer.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Phase {
    /// Zero value table and zero policy, before any work.
    Initial,
    /// Value table has converged for the current policy.
    Evaluated,
    /// Policy has been improved against the converged value table.
    Improved,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Phase::Initial => "initial",
            Phase::Evaluated => "evaluated",
            Phase::Improved => "improved",
        };
        write!(f, "{name}")
    }
}

/// Receives read-only views of the value table and policy as policy
/// iteration progresses, e.g. to render or save them.
pub trait IterationObserver {
    fn observe(
        &mut self,
        round: usize,
        phase: Phase,
        values: ArrayView2<f64>,
        policy: ArrayView2<Action>,
    ) -> Result<()>;
}

impl IterationObserver for () {
    fn observe(
        &mut self, _round: usize, _phase: Phase,
        _values: ArrayView2<f64>, _policy: ArrayView2<Action>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Summary of a completed policy iteration run.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyIterationReport {
    /// Number of evaluate/improve rounds, including the final stable one
    pub rounds: usize,
    /// Total evaluation sweeps across all rounds
    pub sweeps: usize,
    /// Largest value change in the last evaluation sweep
    pub delta: f64,
}


/// The car rental problem and its current solution.
///
/// Owns the value table and the policy. Both are replaced wholesale at
/// sweep and round boundaries.
pub struct CarRental {
    dynamics: Dynamics,
    values: Array2<f64>,
    policy: Array2<Action>,
}

impl CarRental {
    pub fn new(config: RentalConfig) -> Result<CarRental> {
        let dynamics = Dynamics::new(config)?;
        let dim = dynamics.dim();
        Ok(CarRental {
            dynamics,
            values: Array2::zeros((dim, dim)),
            policy: Array2::zeros((dim, dim)),
        })
    }

    /// Rebuild both location models and zero the value table and policy.
    pub fn reset(&mut self) -> Result<()> {
        self.dynamics = Dynamics::new(self.dynamics.config.clone())?;
        let dim = self.dynamics.dim();
        self.values = Array2::zeros((dim, dim));
        self.policy = Array2::zeros((dim, dim));
        Ok(())
    }

    pub fn dynamics(&self) -> &Dynamics {
        &self.dynamics
    }

    pub fn config(&self) -> &RentalConfig {
        &self.dynamics.config
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn policy(&self) -> ArrayView2<'_, Action> {
        self.policy.view()
    }

    pub fn step(&self, state: &State, action: Action) -> Result<(State, f64)> {
        self.dynamics.step(state, action)
    }

    pub fn get_valid_action(&self, state: &State, action: i32) -> Result<Action> {
        self.dynamics.get_valid_action(state, action)
    }

    pub fn get_available_actions(&self, state: &State) -> Result<Vec<Action>> {
        self.dynamics.get_available_actions(state)
    }

    pub fn bellman_expectation(&self, state: &State, action: i32) -> Result<f64> {
        self.dynamics.bellman_expectation(state, action, &self.values.view())
    }

    /// Evaluate the current policy, replacing the value table.
    pub fn policy_evaluation(&mut self) -> Result<policy::Evaluation> {
        let config = &self.dynamics.config;
        let evaluation = policy::evaluate_policy(
            &self.dynamics, &self.policy.view(), &self.values.view(),
            config.theta, config.max_sweeps,
        )?;
        self.values = evaluation.values.clone();
        Ok(evaluation)
    }

    /// Greedily improve the current policy against the value table,
    /// replacing the policy.
    pub fn policy_improvement(&mut self) -> Result<policy::Improvement> {
        let improvement = policy::improve_policy(
            &self.dynamics, &self.policy.view(), &self.values.view())?;
        self.policy = improvement.policy.clone();
        Ok(improvement)
    }

    /// Compute the optimal policy by policy iteration.
    ///
    /// The value table and policy are left holding the solution.
    pub fn policy_iteration(&mut self) -> Result<Array2<Action>> {
        self.policy_iteration_with(&mut ()).map(|(policy, _)| policy)
    }

    /// Policy iteration, reporting the tables to `observer` before the first
    /// round and after every evaluation and improvement.
    pub fn policy_iteration_with(
        &mut self,
        observer: &mut dyn IterationObserver,
    ) -> Result<(Array2<Action>, PolicyIterationReport)> {
        let max_rounds = self.dynamics.config.max_rounds;
        let mut sweeps = 0;
        let mut delta = 0.0;
        observer.observe(0, Phase::Initial, self.values.view(), self.policy.view())?;

        for round in 1..=max_rounds {
            info!("Iterating through policy {round}");
            let evaluation = self.policy_evaluation()?;
            sweeps += evaluation.sweeps;
            delta = evaluation.delta;
            info!(
                "Evaluated policy {round} in {} sweeps (delta {:.5})",
                evaluation.sweeps, evaluation.delta
            );
            observer.observe(round, Phase::Evaluated, self.values.view(), self.policy.view())?;

            let improvement = self.policy_improvement()?;
            observer.observe(round, Phase::Improved, self.values.view(), self.policy.view())?;

            if improvement.stable {
                info!("Policy is stable after {round} rounds");
                let report = PolicyIterationReport { rounds: round, sweeps, delta };
                return Ok((self.policy.clone(), report));
            }
            info!("Improved policy {round}: {} states changed action", improvement.changed);
        }

        Err(RentalError::Divergence { what: "policy iteration", cap: max_rounds, delta })
    }
}
