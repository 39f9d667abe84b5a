use log::debug;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use crate::error::{RentalError, Result};
use crate::solver::{Action, Dynamics};

/// Converged value table for a fixed policy.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub values: Array2<f64>,
    /// Sweeps run before the value table settled
    pub sweeps: usize,
    /// Largest change in the final sweep
    pub delta: f64,
}

/// Result of one greedy improvement step.
#[derive(Debug, Clone)]
pub struct Improvement {
    pub policy: Array2<Action>,
    /// True when no state changed its action
    pub stable: bool,
    /// Number of states whose action changed
    pub changed: usize,
}

fn check_shape(dynamics: &Dynamics, dim: (usize, usize)) -> Result<()> {
    let n = dynamics.dim();
    if dim == (n, n) {
        Ok(())
    } else {
        Err(RentalError::TableShape { expected: (n, n), found: dim })
    }
}

/// Run one synchronous sweep: every state is backed up from the same
/// snapshot `values` and written to a fresh table.
pub fn sweep(
    dynamics: &Dynamics,
    policy: &ArrayView2<Action>,
    values: &ArrayView2<f64>,
) -> Result<Array2<f64>> {
    let dim = dynamics.dim();
    let cells = (0..dim * dim)
        .into_par_iter()
        .map(|i| {
            let s = dynamics.state_at(i);
            dynamics.bellman_expectation(&s, policy[s.index()] as i32, values)
        })
        .collect::<Result<Vec<f64>>>()?;
    Ok(Array2::from_shape_vec((dim, dim), cells)?)
}

/// Iterative policy evaluation.
///
/// Sweeps until the largest change drops below `theta`. Hitting
/// `max_sweeps` first is reported as divergence.
pub fn evaluate_policy(
    dynamics: &Dynamics,
    policy: &ArrayView2<Action>,
    values: &ArrayView2<f64>,
    theta: f64,
    max_sweeps: usize,
) -> Result<Evaluation> {
    check_shape(dynamics, policy.dim())?;
    check_shape(dynamics, values.dim())?;
    let mut current = values.to_owned();
    let mut delta = f64::INFINITY;

    for sweeps in 1..=max_sweeps {
        let next = sweep(dynamics, policy, &current.view())?;
        delta = (&next - &current)
            .iter()
            .fold(0.0, |max, d| f64::max(max, d.abs()));
        debug!("Sweep {sweeps}: value delta {delta:.5}");
        current = next;
        if delta < theta {
            return Ok(Evaluation { values: current, sweeps, delta });
        }
    }

    Err(RentalError::Divergence { what: "policy evaluation", cap: max_sweeps, delta })
}

/// Greedy action for one state. Actions are scanned in ascending order and
/// only a strictly better value replaces the incumbent, so ties go to the
/// lowest action.
fn best_action(
    dynamics: &Dynamics,
    i: usize,
    values: &ArrayView2<f64>,
) -> Result<Action> {
    let s = dynamics.state_at(i);
    let mut best = (0, f64::NEG_INFINITY);
    for a in dynamics.get_available_actions(&s)? {
        let value = dynamics.bellman_expectation(&s, a as i32, values)?;
        if value > best.1 {
            best = (a, value);
        }
    }
    Ok(best.0)
}

/// One step of greedy policy improvement against `values`.
///
/// The new policy is built in a fresh table, so every state is improved
/// against the same value table and the old policy is left untouched.
pub fn improve_policy(
    dynamics: &Dynamics,
    policy: &ArrayView2<Action>,
    values: &ArrayView2<f64>,
) -> Result<Improvement> {
    check_shape(dynamics, policy.dim())?;
    check_shape(dynamics, values.dim())?;
    let dim = dynamics.dim();
    let actions = (0..dim * dim)
        .into_par_iter()
        .map(|i| best_action(dynamics, i, values))
        .collect::<Result<Vec<Action>>>()?;
    let new_policy = Array2::from_shape_vec((dim, dim), actions)?;

    let changed = new_policy
        .iter()
        .zip(policy.iter())
        .filter(|(new, old)| new != old)
        .count();
    Ok(Improvement { policy: new_policy, stable: changed == 0, changed })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RentalConfig;
    use crate::solver::State;
    use approx::assert_abs_diff_eq;

    fn small_dynamics() -> Dynamics {
        Dynamics::new(RentalConfig {
            max_cars: 5,
            max_move: 2,
            rent_mean1: 2.0,
            return_mean1: 2.0,
            rent_mean2: 3.0,
            return_mean2: 1.0,
            ..RentalConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn sweep_reads_only_snapshot() {
        // Arrange
        let dynamics = small_dynamics();
        let policy = Array2::<Action>::zeros((6, 6));
        let values = Array2::<f64>::zeros((6, 6));
        // Act
        let next = sweep(&dynamics, &policy.view(), &values.view()).unwrap();
        // Assert
        // From a zero snapshot each state is worth exactly its expected reward.
        for s in dynamics.states() {
            let reward = dynamics.get_reward(&s).unwrap();
            assert_abs_diff_eq!(next[s.index()], reward, epsilon = 1e-12);
        }
        assert!(values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn zero_policy_converges() {
        // Arrange
        let dynamics = Dynamics::new(RentalConfig::default()).unwrap();
        let policy = Array2::<Action>::zeros((21, 21));
        let values = Array2::<f64>::zeros((21, 21));
        // Act
        let evaluation =
            evaluate_policy(&dynamics, &policy.view(), &values.view(), 1e-3, 1000).unwrap();
        // Assert
        assert!(evaluation.delta < 1e-3);
        assert!(evaluation.sweeps > 1 && evaluation.sweeps < 1000);
        // Converged values satisfy the Bellman equation to within theta / (1 - gamma).
        let view = evaluation.values.view();
        for s in dynamics.states() {
            let backed_up = dynamics.bellman_expectation(&s, 0, &view).unwrap();
            assert_abs_diff_eq!(backed_up, evaluation.values[s.index()], epsilon = 1e-2);
        }
    }

    #[test]
    fn sweep_cap_reports_divergence() {
        // Arrange
        let dynamics = small_dynamics();
        let policy = Array2::<Action>::zeros((6, 6));
        let values = Array2::<f64>::zeros((6, 6));
        // Act
        let result = evaluate_policy(&dynamics, &policy.view(), &values.view(), 1e-3, 2);
        // Assert
        match result {
            Err(RentalError::Divergence { what, cap, delta }) => {
                assert_eq!(what, "policy evaluation");
                assert_eq!(cap, 2);
                assert!(delta >= 1e-3);
            }
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_table_rejected() {
        let dynamics = small_dynamics();
        let policy = Array2::<Action>::zeros((6, 6));
        let values = Array2::<f64>::zeros((4, 4));
        let result = evaluate_policy(&dynamics, &policy.view(), &values.view(), 1e-3, 10);
        assert!(matches!(
            result,
            Err(RentalError::TableShape { expected: (6, 6), found: (4, 4) })
        ));
        let policy = Array2::<Action>::zeros((6, 5));
        let values = Array2::<f64>::zeros((6, 6));
        let result = improve_policy(&dynamics, &policy.view(), &values.view());
        assert!(matches!(
            result,
            Err(RentalError::TableShape { expected: (6, 6), found: (6, 5) })
        ));
    }

    #[test]
    fn improvement_is_greedy() {
        // Arrange
        let dynamics = small_dynamics();
        let policy = Array2::<Action>::zeros((6, 6));
        let values = Array2::<f64>::zeros((6, 6));
        let evaluation =
            evaluate_policy(&dynamics, &policy.view(), &values.view(), 1e-3, 1000).unwrap();
        let view = evaluation.values.view();
        // Act
        let improvement = improve_policy(&dynamics, &policy.view(), &view).unwrap();
        // Assert
        for s in dynamics.states() {
            let chosen = improvement.policy[s.index()];
            let chosen_value = dynamics.bellman_expectation(&s, chosen as i32, &view).unwrap();
            for a in dynamics.get_available_actions(&s).unwrap() {
                let value = dynamics.bellman_expectation(&s, a as i32, &view).unwrap();
                assert!(value <= chosen_value);
                // Nothing below the chosen action does as well.
                if a < chosen {
                    assert!(value < chosen_value);
                }
            }
        }
        assert_eq!(improvement.stable, improvement.changed == 0);
    }

    #[test]
    fn ties_keep_lowest_action() {
        // Arrange: identical locations, free moves and no discount, so a
        // state's value depends only on the pair of morning counts.
        let dynamics = Dynamics::new(RentalConfig {
            max_cars: 4,
            max_move: 2,
            move_cost: 0.0,
            gamma: 0.0,
            rent_mean1: 2.0,
            return_mean1: 2.0,
            rent_mean2: 2.0,
            return_mean2: 2.0,
            ..RentalConfig::default()
        })
        .unwrap();
        let policy = Array2::<Action>::zeros((5, 5));
        let values = Array2::<f64>::zeros((5, 5));
        let s = State::new(1, 2);
        // Moving -1 swaps (1, 2) into (2, 1), worth exactly the same as staying.
        let v_minus = dynamics.bellman_expectation(&s, -1, &values.view()).unwrap();
        let v_zero = dynamics.bellman_expectation(&s, 0, &values.view()).unwrap();
        assert_eq!(v_minus, v_zero);
        // Act
        let improvement = improve_policy(&dynamics, &policy.view(), &values.view()).unwrap();
        // Assert
        assert_eq!(improvement.policy[s.index()], -1);
        assert_eq!(improvement.policy[[0, 0]], 0);
    }

    #[test]
    fn stable_policy_is_idempotent() {
        // Arrange
        let dynamics = small_dynamics();
        let mut policy = Array2::<Action>::zeros((6, 6));
        let mut values = Array2::<f64>::zeros((6, 6));
        loop {
            values = evaluate_policy(&dynamics, &policy.view(), &values.view(), 1e-3, 1000)
                .unwrap()
                .values;
            let improvement = improve_policy(&dynamics, &policy.view(), &values.view()).unwrap();
            policy = improvement.policy;
            if improvement.stable {
                break;
            }
        }
        // Act
        let again = improve_policy(&dynamics, &policy.view(), &values.view()).unwrap();
        // Assert
        assert!(again.stable);
        assert_eq!(again.changed, 0);
        assert_eq!(again.policy, policy);
    }
}
