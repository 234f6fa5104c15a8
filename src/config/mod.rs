use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Compute allocator configuration
    pub allocator: AllocatorConfig,
    /// Trajectory pruner configuration
    pub pruner: PrunerConfig,
    /// Failure monitor configuration
    pub monitor: MonitorConfig,
    /// Session facade configuration
    pub session: SessionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Compute allocator thresholds and scaling factors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Uncertainty below this shrinks the budget
    pub low_threshold: f64,
    /// Uncertainty above this grows the budget
    pub high_threshold: f64,
    /// Multiplier applied below the low threshold
    pub low_scale: f64,
    /// Multiplier applied inside the band
    pub mid_scale: f64,
    /// Multiplier applied just above the high threshold
    pub high_scale: f64,
    /// Multiplier reached at uncertainty 1.0, interpolated from `high_scale`
    pub max_scale: f64,
    /// Smallest budget ever returned
    pub floor: u64,
    /// Largest budget ever returned
    pub ceiling: u64,
}

/// Which child wins when two branch values are equal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The earlier inserted child is ranked first.
    #[default]
    Earliest,
    /// The later inserted child is ranked first.
    Latest,
}

impl std::fmt::Display for TieBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TieBreak::Earliest => write!(f, "earliest"),
            TieBreak::Latest => write!(f, "latest"),
        }
    }
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "earliest" => Ok(TieBreak::Earliest),
            "latest" => Ok(TieBreak::Latest),
            _ => Err(format!("Unknown tie-break rule: {}", s)),
        }
    }
}

/// Trajectory pruner policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrunerConfig {
    /// Uncertainty above which a branch counts as unproductive
    pub unproductive_threshold: f64,
    /// Ordering rule for equal branch values
    pub tie_break: TieBreak,
    /// Branch-value weight of the subtree's mean uncertainty
    pub uncertainty_weight: f64,
    /// Branch-value weight of the subtree's unresolved depth
    pub depth_weight: f64,
}

/// Relative weights of the fatigue components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatigueWeights {
    /// Session length relative to the configured maximum
    pub length: f64,
    /// Share of repeated steps in the window
    pub repetition: f64,
    /// Mean uncertainty in the window
    pub uncertainty: f64,
    /// Rising uncertainty across the window
    pub trend: f64,
}

/// Failure monitor window, weights and thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Capacity of the rolling session window
    pub window_size: usize,
    /// Observations required before any alert can fire
    pub min_observations: usize,
    /// Session length at which the length factor saturates
    pub max_session_length: usize,
    /// Fatigue alert threshold (0.0 - 1.0)
    pub fatigue_threshold: f64,
    /// Hijack alert threshold (0.0 - 1.0)
    pub hijack_threshold: f64,
    /// Fatigue component weights
    pub fatigue_weights: FatigueWeights,
    /// Per-step decay applied to older hijack indicators (0.0 - 1.0]
    pub hijack_decay: f64,
}

/// Session-level settings for the driving-loop facade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base compute budget handed to the allocator every step
    pub base_compute: u64,
    /// Run the pruner every N steps (0 disables)
    pub prune_every: usize,
    /// Link a repeated (action, observation) pair back to its first node
    pub merge_repeated_states: bool,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable output
    Pretty,
    /// JSON structured output
    Json,
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn check_unit(name: &str, value: f64) -> Result<(), AppError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(AppError::config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Config {
            allocator: AllocatorConfig::from_env(),
            pruner: PrunerConfig::from_env(),
            monitor: MonitorConfig::from_env(),
            session: SessionConfig::from_env(),
            logging: LoggingConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate every component configuration
    pub fn validate(&self) -> Result<(), AppError> {
        self.allocator.validate()?;
        self.pruner.validate()?;
        self.monitor.validate()?;
        self.session.validate()
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            low_threshold: 0.3,
            high_threshold: 0.7,
            low_scale: 0.5,
            mid_scale: 1.0,
            high_scale: 2.0,
            max_scale: 2.0,
            floor: 1,
            ceiling: 256,
        }
    }
}

impl AllocatorConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            low_threshold: parse_env("RCF_ALLOC_LOW_THRESHOLD", d.low_threshold),
            high_threshold: parse_env("RCF_ALLOC_HIGH_THRESHOLD", d.high_threshold),
            low_scale: parse_env("RCF_ALLOC_LOW_SCALE", d.low_scale),
            mid_scale: parse_env("RCF_ALLOC_MID_SCALE", d.mid_scale),
            high_scale: parse_env("RCF_ALLOC_HIGH_SCALE", d.high_scale),
            max_scale: parse_env("RCF_ALLOC_MAX_SCALE", d.max_scale),
            floor: parse_env("RCF_ALLOC_FLOOR", d.floor),
            ceiling: parse_env("RCF_ALLOC_CEILING", d.ceiling),
        }
    }

    /// Reject thresholds or scales that would break monotonicity or bounds.
    pub fn validate(&self) -> Result<(), AppError> {
        check_unit("allocator low_threshold", self.low_threshold)?;
        check_unit("allocator high_threshold", self.high_threshold)?;
        if self.low_threshold > self.high_threshold {
            return Err(AppError::config(format!(
                "allocator low_threshold {} exceeds high_threshold {}",
                self.low_threshold, self.high_threshold
            )));
        }
        let scales = [self.low_scale, self.mid_scale, self.high_scale, self.max_scale];
        if scales.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(AppError::config("allocator scales must be positive"));
        }
        if scales.windows(2).any(|w| w[0] > w[1]) {
            return Err(AppError::config(
                "allocator scales must be non-decreasing: low <= mid <= high <= max",
            ));
        }
        if self.floor == 0 || self.floor > self.ceiling {
            return Err(AppError::config(format!(
                "allocator floor {} must be positive and not above ceiling {}",
                self.floor, self.ceiling
            )));
        }
        Ok(())
    }
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            unproductive_threshold: 0.8,
            tie_break: TieBreak::Earliest,
            uncertainty_weight: 0.7,
            depth_weight: 0.3,
        }
    }
}

impl PrunerConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            unproductive_threshold: parse_env(
                "RCF_PRUNE_UNPRODUCTIVE_THRESHOLD",
                d.unproductive_threshold,
            ),
            tie_break: parse_env("RCF_PRUNE_TIE_BREAK", d.tie_break),
            uncertainty_weight: parse_env("RCF_PRUNE_UNCERTAINTY_WEIGHT", d.uncertainty_weight),
            depth_weight: parse_env("RCF_PRUNE_DEPTH_WEIGHT", d.depth_weight),
        }
    }

    /// Reject out-of-range thresholds and degenerate weights.
    pub fn validate(&self) -> Result<(), AppError> {
        check_unit("pruner unproductive_threshold", self.unproductive_threshold)?;
        if [self.uncertainty_weight, self.depth_weight]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(AppError::config(
                "pruner weights must be finite and non-negative",
            ));
        }
        if self.uncertainty_weight + self.depth_weight <= 0.0 {
            return Err(AppError::config("pruner weights must not all be zero"));
        }
        Ok(())
    }
}

impl Default for FatigueWeights {
    fn default() -> Self {
        Self {
            length: 0.2,
            repetition: 0.3,
            uncertainty: 0.3,
            trend: 0.2,
        }
    }
}

impl FatigueWeights {
    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        self.length + self.repetition + self.uncertainty + self.trend
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            min_observations: 3,
            max_session_length: 20,
            fatigue_threshold: 0.7,
            hijack_threshold: 0.5,
            fatigue_weights: FatigueWeights::default(),
            hijack_decay: 0.8,
        }
    }
}

impl MonitorConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            window_size: parse_env("RCF_MONITOR_WINDOW", d.window_size),
            min_observations: parse_env("RCF_MONITOR_MIN_OBSERVATIONS", d.min_observations),
            max_session_length: parse_env(
                "RCF_MONITOR_MAX_SESSION_LENGTH",
                d.max_session_length,
            ),
            fatigue_threshold: parse_env("RCF_FATIGUE_THRESHOLD", d.fatigue_threshold),
            hijack_threshold: parse_env("RCF_HIJACK_THRESHOLD", d.hijack_threshold),
            fatigue_weights: FatigueWeights {
                length: parse_env("RCF_FATIGUE_WEIGHT_LENGTH", d.fatigue_weights.length),
                repetition: parse_env(
                    "RCF_FATIGUE_WEIGHT_REPETITION",
                    d.fatigue_weights.repetition,
                ),
                uncertainty: parse_env(
                    "RCF_FATIGUE_WEIGHT_UNCERTAINTY",
                    d.fatigue_weights.uncertainty,
                ),
                trend: parse_env("RCF_FATIGUE_WEIGHT_TREND", d.fatigue_weights.trend),
            },
            hijack_decay: parse_env("RCF_HIJACK_DECAY", d.hijack_decay),
        }
    }

    /// Reject empty windows, unreachable alert floors and bad weights.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.window_size == 0 {
            return Err(AppError::config("monitor window_size must be positive"));
        }
        if self.min_observations > self.window_size {
            return Err(AppError::config(format!(
                "monitor min_observations {} exceeds window_size {}",
                self.min_observations, self.window_size
            )));
        }
        if self.max_session_length == 0 {
            return Err(AppError::config("monitor max_session_length must be positive"));
        }
        check_unit("monitor fatigue_threshold", self.fatigue_threshold)?;
        check_unit("monitor hijack_threshold", self.hijack_threshold)?;
        let w = &self.fatigue_weights;
        if [w.length, w.repetition, w.uncertainty, w.trend]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(AppError::config("fatigue weights must be non-negative"));
        }
        if w.total() <= 0.0 {
            return Err(AppError::config("fatigue weights must not all be zero"));
        }
        if !(self.hijack_decay > 0.0 && self.hijack_decay <= 1.0) {
            return Err(AppError::config(format!(
                "monitor hijack_decay must be within (0, 1], got {}",
                self.hijack_decay
            )));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_compute: 3,
            prune_every: 0,
            merge_repeated_states: true,
        }
    }
}

impl SessionConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_compute: parse_env("RCF_BASE_COMPUTE", d.base_compute),
            prune_every: parse_env("RCF_PRUNE_EVERY", d.prune_every),
            merge_repeated_states: env::var("RCF_MERGE_REPEATED_STATES")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(d.merge_repeated_states),
        }
    }

    /// Reject a zero base budget.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.base_compute == 0 {
            return Err(AppError::config("session base_compute must be positive"));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        Self {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_allocator_rejects_inverted_thresholds() {
        let config = AllocatorConfig {
            low_threshold: 0.8,
            high_threshold: 0.2,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds high_threshold"));
    }

    #[test]
    fn test_allocator_rejects_decreasing_scales() {
        let config = AllocatorConfig {
            high_scale: 3.0,
            max_scale: 2.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_allocator_rejects_floor_above_ceiling() {
        let config = AllocatorConfig {
            floor: 10,
            ceiling: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_monitor_rejects_min_observations_above_window() {
        let config = MonitorConfig {
            window_size: 4,
            min_observations: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_monitor_rejects_zero_weights() {
        let config = MonitorConfig {
            fatigue_weights: FatigueWeights {
                length: 0.0,
                repetition: 0.0,
                uncertainty: 0.0,
                trend: 0.0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pruner_rejects_threshold_out_of_range() {
        let config = PrunerConfig {
            unproductive_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pruner_rejects_non_finite_weights() {
        for depth_weight in [f64::NAN, f64::INFINITY] {
            let config = PrunerConfig {
                depth_weight,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "accepted {}", depth_weight);
        }
        let config = PrunerConfig {
            uncertainty_weight: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tie_break_from_str() {
        assert_eq!("earliest".parse::<TieBreak>().unwrap(), TieBreak::Earliest);
        assert_eq!("LATEST".parse::<TieBreak>().unwrap(), TieBreak::Latest);
        assert!("random".parse::<TieBreak>().is_err());
        assert_eq!(TieBreak::Latest.to_string(), "latest");
    }

    #[test]
    fn test_session_rejects_zero_base_compute() {
        let config = SessionConfig {
            base_compute: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
