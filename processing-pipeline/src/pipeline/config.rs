use std::time::Duration;

use common::utils::config::AppConfig;

/// Backoff for infrastructure failures of queued jobs, intake batch sizing, and
/// the time an attempt may spend before it reaches the destination.
#[derive(Debug, Clone)]
pub struct PipelineTuning {
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub retry_backoff_cap_exponent: u32,
    /// PENDING articles queued per site by one intake job.
    pub pending_batch_limit: u32,
    /// Ceiling for the rewrite and image stages of one attempt. Kept below the
    /// stale-processing cutoff so the sweep never fails a live attempt.
    pub pre_publish_budget: Duration,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            retry_base_delay_secs: 30,
            retry_max_delay_secs: 15 * 60,
            retry_backoff_cap_exponent: 5,
            pending_batch_limit: 50,
            pre_publish_budget: pre_publish_budget(RetentionPolicy::default().processing_timeout_mins),
        }
    }
}

/// Housekeeping windows for stuck and expired articles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub processing_timeout_mins: i64,
    pub duplicate_retention_days: i64,
    pub failed_retention_days: i64,
    pub retry_ceiling: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            processing_timeout_mins: 30,
            duplicate_retention_days: 30,
            failed_retention_days: 7,
            retry_ceiling: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub tuning: PipelineTuning,
    pub retention: RetentionPolicy,
}

impl PipelineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let processing_timeout_mins = config.processing_timeout_mins.max(1);
        Self {
            tuning: PipelineTuning {
                pre_publish_budget: pre_publish_budget(processing_timeout_mins),
                ..PipelineTuning::default()
            },
            retention: RetentionPolicy {
                processing_timeout_mins,
                duplicate_retention_days: config.duplicate_retention_days,
                failed_retention_days: config.failed_retention_days,
                retry_ceiling: config.retry_ceiling,
            },
        }
    }
}

/// Half of the stale-processing timeout.
fn pre_publish_budget(processing_timeout_mins: i64) -> Duration {
    let secs = u64::try_from(processing_timeout_mins.max(1)).unwrap_or(1).saturating_mul(30);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_stays_below_the_stale_cutoff() {
        let config = PipelineConfig::default();
        let cutoff = Duration::from_secs(
            u64::try_from(config.retention.processing_timeout_mins).unwrap_or_default() * 60,
        );
        assert_eq!(config.tuning.pre_publish_budget, Duration::from_secs(15 * 60));
        assert!(config.tuning.pre_publish_budget < cutoff);
        assert_eq!(pre_publish_budget(0), Duration::from_secs(30));
    }
}
