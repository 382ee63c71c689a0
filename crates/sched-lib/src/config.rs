//! Scheduler tunables
//!
//! Every front end starts from its own defaults and then applies
//! `MULTIRESOURCE_*` environment overrides. `PROMETHEUS_URL` overrides the
//! metrics endpoint.

use crate::admission::AdmissionFilter;
use crate::metrics::{MatchPolicy, ProbeConfig, DEFAULT_PROMETHEUS_URL};
use crate::requirements::IoEstimate;
use crate::scoring::{ScoringMode, ScoringPolicy, DEFAULT_MAX_SCORE};
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Environment variable prefix for tunables
pub const ENV_PREFIX: &str = "MULTIRESOURCE";

/// Which front end the tunables are for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontEnd {
    Extender,
    Plugin,
    BindLoop,
}

impl FrontEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrontEnd::Extender => "extender",
            FrontEnd::Plugin => "plugin",
            FrontEnd::BindLoop => "bind-loop",
        }
    }
}

/// Tunables shared by every front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerTunables {
    /// Spread/pack bias for weighted-usage scoring, utilization ceiling
    /// for admission when preemption is enabled
    pub alpha: f64,
    pub max_score: i64,
    pub refresh_interval_secs: u64,
    pub preemption_enabled: bool,
    pub scoring: ScoringMode,
    pub io_estimate: IoEstimate,
    pub match_policy: MatchPolicy,
    pub metrics_timeout_secs: u64,
    pub prometheus_url: String,
    /// Workloads addressed to this name are handled by the bind loop
    pub scheduler_name: String,
}

/// Environment overrides, all optional
#[derive(Debug, Default, Deserialize)]
struct TunablesOverrides {
    alpha: Option<f64>,
    #[serde(alias = "maxscore")]
    max_score: Option<i64>,
    refresh_interval_secs: Option<u64>,
    preemption_enabled: Option<bool>,
    scoring: Option<ScoringMode>,
    io_estimate: Option<IoEstimate>,
    match_policy: Option<MatchPolicy>,
    metrics_timeout_secs: Option<u64>,
    prometheus_url: Option<String>,
    scheduler_name: Option<String>,
}

impl SchedulerTunables {
    /// Defaults of a front end before any override
    pub fn defaults_for(front_end: FrontEnd) -> Self {
        let base = Self {
            alpha: 0.8,
            max_score: DEFAULT_MAX_SCORE,
            refresh_interval_secs: 30,
            preemption_enabled: false,
            scoring: ScoringMode::DominantShare,
            io_estimate: IoEstimate::Heuristic,
            match_policy: MatchPolicy::FailClosed,
            metrics_timeout_secs: 10,
            prometheus_url: DEFAULT_PROMETHEUS_URL.to_string(),
            scheduler_name: "multi-resource-extender".to_string(),
        };

        match front_end {
            FrontEnd::Extender => base,
            FrontEnd::Plugin => Self {
                alpha: 0.5,
                scoring: ScoringMode::WeightedUsage,
                io_estimate: IoEstimate::PerCore,
                scheduler_name: "MultiResource".to_string(),
                ..base
            },
            FrontEnd::BindLoop => Self {
                preemption_enabled: true,
                io_estimate: IoEstimate::Zero,
                scheduler_name: "preemptive-scheduler".to_string(),
                ..base
            },
        }
    }

    /// Load tunables from the process environment
    pub fn load(front_end: FrontEnd) -> Result<Self, ConfigError> {
        Self::load_from(
            front_end,
            Environment::with_prefix(ENV_PREFIX),
            std::env::var("PROMETHEUS_URL").ok(),
        )
    }

    /// Load tunables from an explicit environment source
    pub fn load_from(
        front_end: FrontEnd,
        env: Environment,
        prometheus_url: Option<String>,
    ) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(env.try_parsing(true))
            .set_override_option("prometheus_url", prometheus_url.filter(|u| !u.is_empty()))?
            .build()?;

        let overrides: TunablesOverrides = settings.try_deserialize()?;
        Ok(Self::defaults_for(front_end).apply(overrides))
    }

    fn apply(mut self, overrides: TunablesOverrides) -> Self {
        if let Some(alpha) = overrides.alpha {
            self.alpha = alpha;
        }
        if let Some(max_score) = overrides.max_score {
            self.max_score = max_score;
        }
        if let Some(secs) = overrides.refresh_interval_secs {
            self.refresh_interval_secs = secs;
        }
        if let Some(enabled) = overrides.preemption_enabled {
            self.preemption_enabled = enabled;
        }
        if let Some(scoring) = overrides.scoring {
            self.scoring = scoring;
        }
        if let Some(estimate) = overrides.io_estimate {
            self.io_estimate = estimate;
        }
        if let Some(policy) = overrides.match_policy {
            self.match_policy = policy;
        }
        if let Some(secs) = overrides.metrics_timeout_secs {
            self.metrics_timeout_secs = secs;
        }
        if let Some(url) = overrides.prometheus_url {
            self.prometheus_url = url;
        }
        if let Some(name) = overrides.scheduler_name {
            self.scheduler_name = name;
        }
        self.validated()
    }

    /// Clamp out-of-range values, warning about each
    pub fn validated(mut self) -> Self {
        if !(0.0..=1.0).contains(&self.alpha) || self.alpha.is_nan() {
            let clamped = if self.alpha.is_nan() { 0.5 } else { self.alpha.clamp(0.0, 1.0) };
            warn!(alpha = self.alpha, clamped = clamped, "alpha out of range, clamping");
            self.alpha = clamped;
        }
        if self.max_score <= 0 {
            warn!(max_score = self.max_score, "max_score must be positive, using default");
            self.max_score = DEFAULT_MAX_SCORE;
        }
        if self.refresh_interval_secs == 0 {
            warn!("refresh interval of zero, using 1s");
            self.refresh_interval_secs = 1;
        }
        if self.metrics_timeout_secs == 0 {
            warn!("metrics timeout of zero, using 1s");
            self.metrics_timeout_secs = 1;
        }
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn metrics_timeout(&self) -> Duration {
        Duration::from_secs(self.metrics_timeout_secs)
    }

    /// Admission uses alpha as a utilization ceiling only when
    /// preemption is enabled
    pub fn admission_filter(&self) -> AdmissionFilter {
        if self.preemption_enabled {
            AdmissionFilter::with_ceiling(self.alpha)
        } else {
            AdmissionFilter::capacity_only()
        }
    }

    pub fn scoring_policy(&self) -> Arc<dyn ScoringPolicy> {
        self.scoring.build(self.alpha, self.max_score)
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            match_policy: self.match_policy,
            query_timeout: self.metrics_timeout(),
            scheduler_name: self.scheduler_name.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn test_front_end_defaults() {
        let extender = SchedulerTunables::defaults_for(FrontEnd::Extender);
        assert_eq!(extender.alpha, 0.8);
        assert_eq!(extender.scoring, ScoringMode::DominantShare);
        assert!(!extender.preemption_enabled);
        assert_eq!(extender.io_estimate, IoEstimate::Heuristic);

        let plugin = SchedulerTunables::defaults_for(FrontEnd::Plugin);
        assert_eq!(plugin.alpha, 0.5);
        assert_eq!(plugin.scoring, ScoringMode::WeightedUsage);
        assert_eq!(plugin.io_estimate, IoEstimate::PerCore);

        let bind = SchedulerTunables::defaults_for(FrontEnd::BindLoop);
        assert!(bind.preemption_enabled);
        assert_eq!(bind.io_estimate, IoEstimate::Zero);
        assert_eq!(bind.scheduler_name, "preemptive-scheduler");
    }

    #[test]
    fn test_env_overrides() {
        let tunables = SchedulerTunables::load_from(
            FrontEnd::Extender,
            env(&[
                ("MULTIRESOURCE_ALPHA", "0.3"),
                ("MULTIRESOURCE_MAX_SCORE", "10"),
                ("MULTIRESOURCE_PREEMPTION_ENABLED", "true"),
                ("MULTIRESOURCE_SCORING", "weighted-usage"),
                ("MULTIRESOURCE_MATCH_POLICY", "any-available"),
            ]),
            Some("http://prom:9090".to_string()),
        )
        .unwrap();

        assert_eq!(tunables.alpha, 0.3);
        assert_eq!(tunables.max_score, 10);
        assert!(tunables.preemption_enabled);
        assert_eq!(tunables.scoring, ScoringMode::WeightedUsage);
        assert_eq!(tunables.match_policy, MatchPolicy::AnyAvailable);
        assert_eq!(tunables.prometheus_url, "http://prom:9090");
        assert_eq!(tunables.refresh_interval_secs, 30);
    }

    #[test]
    fn test_empty_env_keeps_defaults() {
        let tunables = SchedulerTunables::load_from(FrontEnd::BindLoop, env(&[]), None).unwrap();
        assert_eq!(tunables, SchedulerTunables::defaults_for(FrontEnd::BindLoop));
    }

    #[test]
    fn test_out_of_range_alpha_is_clamped() {
        let tunables = SchedulerTunables::load_from(
            FrontEnd::Extender,
            env(&[("MULTIRESOURCE_ALPHA", "1.7"), ("MULTIRESOURCE_MAX_SCORE", "-4")]),
            None,
        )
        .unwrap();
        assert_eq!(tunables.alpha, 1.0);
        assert_eq!(tunables.max_score, DEFAULT_MAX_SCORE);
    }

    #[test]
    fn test_ceiling_only_with_preemption() {
        let mut tunables = SchedulerTunables::defaults_for(FrontEnd::Extender);
        assert_eq!(tunables.admission_filter().ceiling(), None);

        tunables.preemption_enabled = true;
        assert_eq!(tunables.admission_filter().ceiling(), Some(0.8));
    }

    #[test]
    fn test_probe_config_carries_scheduler_name() {
        let tunables = SchedulerTunables::defaults_for(FrontEnd::BindLoop);
        let config = tunables.probe_config();
        assert_eq!(config.scheduler_name, "preemptive-scheduler");
        assert_eq!(config.query_timeout, tunables.metrics_timeout());
    }
}
