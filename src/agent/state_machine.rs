//! Iteration state machine for one agent.
//!
//! States are explicit and the transition function is pure: the driver in
//! [`crate::agent::controller`] performs the side effect of the current state
//! and then asks [`next_state`] where to go.

use crate::config::DepthMode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// States of one agent's evaluation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationState {
    /// Nothing generated yet.
    Initial,
    /// Score the latest response.
    ClarityCheck,
    /// Ask the model to revise its response.
    Refining,
    /// Terminal.
    Terminated,
}

impl IterationState {
    pub fn is_terminal(self) -> bool {
        self == Self::Terminated
    }
}

impl fmt::Display for IterationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "Initial"),
            Self::ClarityCheck => write!(f, "ClarityCheck"),
            Self::Refining => write!(f, "Refining"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Why a loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Hit the hard cap of twice the iteration limit.
    ForcedStop,
    /// Depth mode disables self-refinement.
    SingleShot,
    /// Reached the iteration limit.
    MaxIterations,
    /// Clarity reached the threshold.
    ClarityReached,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForcedStop => write!(f, "forced stop"),
            Self::SingleShot => write!(f, "single pass"),
            Self::MaxIterations => write!(f, "iteration limit"),
            Self::ClarityReached => write!(f, "clarity reached"),
        }
    }
}

/// What the transition function needs to know about a loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSnapshot {
    pub iteration_count: u32,
    /// Verdict on the latest response, until a refinement consumes it.
    pub pending_clarity: Option<PendingClarity>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingClarity {
    pub score: f64,
    pub has_enough_info: bool,
}

/// Result of one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: IterationState,
    pub reason: Option<TerminationReason>,
}

impl Transition {
    fn to(next: IterationState) -> Self {
        Self { next, reason: None }
    }

    fn stop(reason: TerminationReason) -> Self {
        Self {
            next: IterationState::Terminated,
            reason: Some(reason),
        }
    }
}

/// Decide the next state. Rules are checked in priority order.
pub fn next_state(snapshot: &LoopSnapshot, depth: &DepthMode) -> Transition {
    let count = snapshot.iteration_count;

    if count >= depth.max_iterations.saturating_mul(2) {
        return Transition::stop(TerminationReason::ForcedStop);
    }
    if depth.skip_self_refinement && count >= 1 {
        return Transition::stop(TerminationReason::SingleShot);
    }
    if count >= depth.max_iterations {
        return Transition::stop(TerminationReason::MaxIterations);
    }

    match snapshot.pending_clarity {
        Some(clarity) if clarity.has_enough_info => {
            Transition::stop(TerminationReason::ClarityReached)
        }
        None if count == 1 => Transition::to(IterationState::ClarityCheck),
        Some(_) => Transition::to(IterationState::Refining),
        None => Transition::to(IterationState::ClarityCheck),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(max_iterations: u32, skip: bool) -> DepthMode {
        DepthMode {
            max_iterations,
            clarity_threshold: 0.8,
            skip_self_refinement: skip,
            token_budget_per_agent: 1024,
        }
    }

    fn snapshot(count: u32, clarity: Option<(f64, bool)>) -> LoopSnapshot {
        LoopSnapshot {
            iteration_count: count,
            pending_clarity: clarity.map(|(score, has_enough_info)| PendingClarity {
                score,
                has_enough_info,
            }),
        }
    }

    #[test]
    fn test_hard_cap_wins_over_everything() {
        let t = next_state(&snapshot(6, Some((0.9, true))), &depth(3, true));
        assert_eq!(t.reason, Some(TerminationReason::ForcedStop));
        assert!(t.next.is_terminal());
    }

    #[test]
    fn test_single_shot_stops_after_first_generation() {
        let t = next_state(&snapshot(1, None), &depth(3, true));
        assert_eq!(t, Transition::stop(TerminationReason::SingleShot));
    }

    #[test]
    fn test_iteration_limit() {
        let t = next_state(&snapshot(3, Some((0.2, false))), &depth(3, false));
        assert_eq!(t.reason, Some(TerminationReason::MaxIterations));
    }

    #[test]
    fn test_clear_enough_stops() {
        let t = next_state(&snapshot(2, Some((0.85, true))), &depth(3, false));
        assert_eq!(t.reason, Some(TerminationReason::ClarityReached));
    }

    #[test]
    fn test_first_generation_goes_to_clarity_check() {
        let t = next_state(&snapshot(1, None), &depth(3, false));
        assert_eq!(t.next, IterationState::ClarityCheck);
    }

    #[test]
    fn test_unclear_goes_to_refining() {
        let t = next_state(&snapshot(1, Some((0.4, false))), &depth(3, false));
        assert_eq!(t.next, IterationState::Refining);
    }

    #[test]
    fn test_after_refinement_goes_back_to_clarity_check() {
        let t = next_state(&snapshot(2, None), &depth(3, false));
        assert_eq!(t.next, IterationState::ClarityCheck);
    }

    #[test]
    fn test_simulated_loop_never_exceeds_hard_cap() {
        for max in 1..=6 {
            for skip in [false, true] {
                let mode = depth(max, skip);
                let mut snap = snapshot(1, None);
                let mut steps = 0;

                loop {
                    let transition = next_state(&snap, &mode);
                    match transition.next {
                        IterationState::Terminated => break,
                        IterationState::ClarityCheck => {
                            snap.pending_clarity = Some(PendingClarity {
                                score: 0.3,
                                has_enough_info: false,
                            });
                        }
                        IterationState::Refining => {
                            snap.pending_clarity = None;
                            snap.iteration_count += 1;
                        }
                        IterationState::Initial => unreachable!(),
                    }
                    steps += 1;
                    assert!(steps < 100);
                }

                assert!(snap.iteration_count <= 2 * max);
                let expected = if skip { 1 } else { max };
                assert_eq!(snap.iteration_count, expected);
            }
        }
    }
}
