//! Admission-control policy for new batch proofs.

use std::{sync::Arc, time::Duration};

use alloy_primitives::U256;
use tracing::debug;

use crate::{config::ProfitabilityConfig, submitter::SubmissionSchedule};

/// Decides whether proving a batch for the offered collateral is worthwhile.
/// Selected once at construction; no runtime strategy switching.
pub enum ProfitabilityGate {
    /// Always profitable. Permissive and test deployments.
    AcceptAll,
    /// Profitable if the collateral clears the minimum reward, or if long
    /// enough has passed since the last final-proof submission. The time
    /// override keeps the pipeline moving when the collateral signal is zero
    /// or not wired up.
    Threshold {
        min_reward: U256,
        submit_anyway_after: Duration,
        schedule: Arc<SubmissionSchedule>,
    },
}

impl ProfitabilityGate {
    pub fn from_config(config: &ProfitabilityConfig, schedule: Arc<SubmissionSchedule>) -> Self {
        match config {
            ProfitabilityConfig::AcceptAll => ProfitabilityGate::AcceptAll,
            ProfitabilityConfig::Threshold {
                min_reward,
                submit_anyway_after_secs,
            } => ProfitabilityGate::Threshold {
                min_reward: *min_reward,
                submit_anyway_after: Duration::from_secs(*submit_anyway_after_secs),
                schedule,
            },
        }
    }

    pub fn is_profitable(&self, collateral: U256) -> bool {
        match self {
            ProfitabilityGate::AcceptAll => true,
            ProfitabilityGate::Threshold {
                min_reward,
                submit_anyway_after,
                schedule,
            } => {
                if collateral >= *min_reward {
                    return true;
                }
                let idle = schedule.elapsed_since_last_submission();
                let overdue = idle >= *submit_anyway_after;
                if overdue {
                    debug!(?idle, "profitability override kicked in");
                }
                overdue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_all() {
        let gate = ProfitabilityGate::AcceptAll;
        assert!(gate.is_profitable(U256::ZERO));
    }

    #[test]
    fn test_threshold_min_reward() {
        let schedule = Arc::new(SubmissionSchedule::new(Duration::from_secs(3600)));
        let gate = ProfitabilityGate::Threshold {
            min_reward: U256::from(100),
            submit_anyway_after: Duration::from_secs(3600),
            schedule,
        };
        assert!(gate.is_profitable(U256::from(100)));
        assert!(gate.is_profitable(U256::from(150)));
        assert!(!gate.is_profitable(U256::from(50)));
    }

    #[test]
    fn test_threshold_time_override() {
        let schedule = Arc::new(SubmissionSchedule::new(Duration::from_secs(3600)));
        schedule.note_submission();
        let gate = ProfitabilityGate::Threshold {
            min_reward: U256::from(100),
            submit_anyway_after: Duration::from_millis(50),
            schedule: schedule.clone(),
        };

        // Right after a submission the same collateral is rejected...
        assert!(!gate.is_profitable(U256::from(50)));

        // ...but becomes acceptable once the override interval has elapsed.
        std::thread::sleep(Duration::from_millis(80));
        assert!(gate.is_profitable(U256::from(50)));

        // A new submission resets the clock.
        schedule.note_submission();
        assert!(!gate.is_profitable(U256::from(50)));
    }
}
