//! Transcode concurrency planning.
//!
//! Extraction is serial (one optical drive), but transcodes of separate
//! titles can overlap. The plan caps overlap from the logical core count
//! unless the operator pins an explicit limit.

use autorip_config::TranscodeConfig;

/// Concurrency plan derived from configuration and system resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodePlan {
    /// Total logical CPU cores available.
    pub total_cores: u32,
    /// Maximum number of titles transcoding at once.
    pub max_concurrent: u32,
}

impl TranscodePlan {
    /// Derives a plan from configuration.
    ///
    /// Core count comes from config or is auto-detected. An explicit
    /// non-zero `max_concurrent` wins; otherwise one transcode per four
    /// cores, at least one, at most four.
    pub fn derive(cfg: &TranscodeConfig) -> Self {
        let total_cores = cfg.logical_cores.unwrap_or_else(|| num_cpus::get() as u32);

        let max_concurrent = if cfg.max_concurrent > 0 {
            cfg.max_concurrent
        } else {
            (total_cores / 4).clamp(1, 4)
        };

        Self {
            total_cores,
            max_concurrent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cfg(cores: Option<u32>, max_concurrent: u32) -> TranscodeConfig {
        TranscodeConfig {
            logical_cores: cores,
            max_concurrent,
        }
    }

    #[test]
    fn test_derivation_scales_with_cores() {
        assert_eq!(TranscodePlan::derive(&cfg(Some(2), 0)).max_concurrent, 1);
        assert_eq!(TranscodePlan::derive(&cfg(Some(4), 0)).max_concurrent, 1);
        assert_eq!(TranscodePlan::derive(&cfg(Some(8), 0)).max_concurrent, 2);
        assert_eq!(TranscodePlan::derive(&cfg(Some(16), 0)).max_concurrent, 4);
        // Capped even on very wide machines.
        assert_eq!(TranscodePlan::derive(&cfg(Some(64), 0)).max_concurrent, 4);
    }

    #[test]
    fn test_explicit_limit_wins() {
        let plan = TranscodePlan::derive(&cfg(Some(64), 2));
        assert_eq!(plan.max_concurrent, 2);
        assert_eq!(plan.total_cores, 64);
    }

    #[test]
    fn test_auto_detect_cores() {
        let plan = TranscodePlan::derive(&cfg(None, 0));
        assert!(plan.total_cores >= 1);
        assert!(plan.max_concurrent >= 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Derived concurrency always lands in [1, 4] and never exceeds
        // one transcode per four cores on machines with 4+ cores.
        #[test]
        fn prop_derived_limit_bounded(cores in 1u32..256) {
            let plan = TranscodePlan::derive(&cfg(Some(cores), 0));
            prop_assert!(plan.max_concurrent >= 1);
            prop_assert!(plan.max_concurrent <= 4);
            if cores >= 4 {
                prop_assert!(plan.max_concurrent <= cores / 4);
            }
        }

        // Explicit non-zero limits pass through unchanged.
        #[test]
        fn prop_explicit_limit_preserved(cores in 1u32..256, limit in 1u32..16) {
            let plan = TranscodePlan::derive(&cfg(Some(cores), limit));
            prop_assert_eq!(plan.max_concurrent, limit);
        }
    }
}
