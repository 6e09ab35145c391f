use crate::events::RewardSignal;

/// Turns tool-call outcomes into normalized rewards in [-1, +1].
#[derive(Debug, Clone)]
pub struct RewardCalculator {
    /// Penalty per millisecond of latency
    pub latency_scale: f64,
    /// Cap on the latency penalty
    pub latency_cap: f64,
    /// Penalty per schema token
    pub context_scale: f64,
    /// Cap on the context penalty
    pub context_cap: f64,
    /// Flat penalty when the next user turn is a near-duplicate retry
    pub followup_penalty: f64,
}

impl Default for RewardCalculator {
    fn default() -> Self {
        Self {
            latency_scale: 0.001,
            latency_cap: 0.3,
            context_scale: 0.0001,
            context_cap: 0.2,
            followup_penalty: 0.2,
        }
    }
}

impl RewardCalculator {
    pub fn calculate(
        &self,
        tool_name: &str,
        success: bool,
        execution_time_ms: f64,
        schema_tokens: usize,
        is_followup_retry: bool,
    ) -> RewardSignal {
        let mut reward = RewardSignal::new(tool_name);

        reward.success_reward = if success { 1.0 } else { -1.0 };

        // Latency only penalizes successes; failures already pay -1.
        if success {
            reward.latency_penalty =
                -(execution_time_ms * self.latency_scale).min(self.latency_cap);
        }

        reward.context_cost_penalty =
            -(schema_tokens as f64 * self.context_scale).min(self.context_cap);

        if is_followup_retry {
            reward.followup_penalty = -self.followup_penalty;
        }

        let total = reward.success_reward
            + reward.latency_penalty
            + reward.context_cost_penalty
            + reward.followup_penalty;
        reward.total_reward = total.clamp(-1.0, 1.0);

        reward
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_reward_components() {
        let calc = RewardCalculator::default();
        let reward = calc.calculate("email.send", true, 100.0, 50, false);

        assert_eq!(reward.success_reward, 1.0);
        assert!(reward.latency_penalty < 0.0);
        assert!(reward.context_cost_penalty < 0.0);
        assert_eq!(reward.followup_penalty, 0.0);
        assert!(reward.total_reward > 0.0 && reward.total_reward <= 1.0);
    }

    #[test]
    fn test_failure_skips_latency_penalty() {
        let calc = RewardCalculator::default();
        let reward = calc.calculate("email.send", false, 5000.0, 50, false);

        assert_eq!(reward.success_reward, -1.0);
        assert_eq!(reward.latency_penalty, 0.0);
        assert!(reward.total_reward < 0.0);
        assert!(reward.total_reward >= -1.0);
    }

    #[test]
    fn test_latency_penalty_capped() {
        let calc = RewardCalculator::default();
        let reward = calc.calculate("slow.tool", true, 10_000_000.0, 0, false);
        assert_eq!(reward.latency_penalty, -calc.latency_cap);
    }

    #[test]
    fn test_followup_retry_penalized() {
        let calc = RewardCalculator::default();
        let plain = calc.calculate("email.send", true, 10.0, 10, false);
        let retried = calc.calculate("email.send", true, 10.0, 10, true);
        assert!(retried.total_reward < plain.total_reward);
        assert_eq!(retried.followup_penalty, -0.2);
    }

    #[test]
    fn test_total_clamped() {
        let calc = RewardCalculator {
            followup_penalty: 5.0,
            ..Default::default()
        };
        let reward = calc.calculate("x", false, 0.0, 1_000_000, true);
        assert_eq!(reward.total_reward, -1.0);
    }
}
