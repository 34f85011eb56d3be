//! Timing parameters for the completion resolver.

use std::time::Duration;

use genwatch_core::job::WorkflowKind;

/// Default bound on a single probe or poll request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on any job's hard ceiling (30 days).
pub const MAX_CEILING: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Tunable cadence and ceiling for one resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Delay before the first round, letting the backend publish links.
    pub grace_period: Duration,
    /// Interval between rounds while aggressive.
    pub aggressive_interval: Duration,
    /// Number of aggressive rounds before dropping to the regular cadence.
    pub aggressive_rounds: u32,
    /// Interval between rounds once regular.
    pub regular_interval: Duration,
    /// Cadence of progress recomputation.
    pub progress_interval: Duration,
    /// Hard ceiling as a multiple of the ETA.
    pub ceiling_multiplier: f64,
    /// Longest a single probe or poll may take before the round counts
    /// it as not ready.
    pub request_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(3),
            aggressive_interval: Duration::from_millis(1500),
            aggressive_rounds: 10,
            regular_interval: Duration::from_secs(3),
            progress_interval: Duration::from_millis(100),
            ceiling_multiplier: 3.0,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ResolverConfig {
    /// Defaults with the workflow's own ceiling multiplier.
    pub fn for_kind(kind: WorkflowKind) -> Self {
        Self {
            ceiling_multiplier: kind.default_ceiling_multiplier(),
            ..Default::default()
        }
    }

    /// Hard ceiling for a job with the given ETA.
    ///
    /// Multipliers below 1 are treated as 1 so the ceiling never lands
    /// before the ETA itself. The result saturates at [`MAX_CEILING`].
    pub fn ceiling_for(&self, eta_seconds: f64) -> Duration {
        let multiplier = if self.ceiling_multiplier.is_finite() {
            self.ceiling_multiplier.max(1.0)
        } else {
            1.0
        };
        Duration::try_from_secs_f64(eta_seconds.max(0.0) * multiplier)
            .map_or(MAX_CEILING, |ceiling| ceiling.min(MAX_CEILING))
    }

    /// Interval to wait after `completed_rounds` rounds.
    pub fn interval_after(&self, completed_rounds: u32) -> Duration {
        if completed_rounds < self.aggressive_rounds {
            self.aggressive_interval
        } else {
            self.regular_interval
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_is_eta_times_multiplier() {
        let config = ResolverConfig::default();
        assert_eq!(config.ceiling_for(10.0), Duration::from_secs(30));
        assert_eq!(config.ceiling_for(5.0), Duration::from_secs(15));
    }

    #[test]
    fn ceiling_multiplier_is_clamped() {
        let config = ResolverConfig {
            ceiling_multiplier: 0.2,
            ..Default::default()
        };
        assert_eq!(config.ceiling_for(10.0), Duration::from_secs(10));
    }

    #[test]
    fn huge_eta_saturates_the_ceiling() {
        let config = ResolverConfig::default();
        assert_eq!(config.ceiling_for(1e19), MAX_CEILING);
        assert_eq!(config.ceiling_for(f64::MAX), MAX_CEILING);
        assert_eq!(config.ceiling_for(f64::INFINITY), MAX_CEILING);
    }

    #[test]
    fn per_kind_multiplier() {
        assert_eq!(
            ResolverConfig::for_kind(WorkflowKind::TextTo3d).ceiling_for(10.0),
            Duration::from_secs(50)
        );
        assert_eq!(
            ResolverConfig::for_kind(WorkflowKind::Music).ceiling_for(10.0),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn interval_switches_after_aggressive_budget() {
        let config = ResolverConfig::default();
        assert_eq!(config.interval_after(0), Duration::from_millis(1500));
        assert_eq!(config.interval_after(9), Duration::from_millis(1500));
        assert_eq!(config.interval_after(10), Duration::from_secs(3));
    }
}
