//! Dialer configuration
//!
//! The top-level fields are the policy surface exposed to users (line count, AMD,
//! voicemail skipping, aggressive mode, greeting). Operational tuning lives in
//! nested sections, each with defaults so a partial TOML file is enough:
//!
//! ```toml
//! parallelLines = 3
//! amdEnabled = true
//! amdSensitivity = "high"
//! autoSkipVoicemail = true
//!
//! [scheduler]
//! dialRatePerSecond = 2.0
//! maxAttempts = 3
//!
//! [arbiter]
//! raceWindowMs = 150
//! notificationUrl = "https://crm.example.com/api/calls/rejected"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{DialerError, Result};
use crate::retry::RetryConfig;
use crate::types::AmdSensitivity;

/// Maximum number of parallel lines a session may use
pub const MAX_PARALLEL_LINES: usize = 10;

/// Main dialer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DialerConfig {
    /// Number of simultaneous lines (1-10)
    pub parallel_lines: usize,
    pub amd_enabled: bool,
    pub amd_sensitivity: AmdSensitivity,
    /// Hang up on machine answers instead of bridging them
    pub auto_skip_voicemail: bool,
    pub aggressive_dialing: bool,
    /// Audio played to the callee while the agent is bridged in
    pub greeting_url: Option<String>,
    /// Caller id presented on outbound calls
    pub caller_id: String,
    pub scheduler: SchedulerConfig,
    pub lines: LineConfig,
    pub arbiter: ArbiterConfig,
    pub verification: VerificationConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
}

/// Dial scheduler tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    pub dial_rate_per_second: f64,
    /// Rate multiplier applied when aggressive dialing is on
    pub aggressive_multiplier: f64,
    pub max_attempts: u32,
    pub tick_interval_ms: u64,
    /// Force-disconnect in-flight lines when the session stops
    pub hangup_on_stop: bool,
    /// Numbers that must never be dialed
    pub do_not_call: Vec<String>,
}

/// Per-line timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LineConfig {
    pub cool_down_ms: u64,
    /// Age after which the watchdog recycles a line that never reached the agent
    pub max_line_age_secs: u64,
    /// Age after which the watchdog recycles a bridged call. Agent
    /// conversations routinely outlast `max_line_age_secs`.
    pub max_bridged_age_secs: u64,
    pub watchdog_interval_ms: u64,
    pub disconnect_timeout_ms: u64,
}

/// Agent-bridge arbitration and rejection notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArbiterConfig {
    pub race_window_ms: u64,
    pub notification_url: Option<String>,
    pub notification_max_attempts: u32,
    pub notification_initial_delay_ms: u64,
    pub notification_backoff_multiplier: f64,
}

/// Verification thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerificationConfig {
    pub integrity_pass_rate: f64,
    pub disposition_pass_rate: f64,
    pub drop_success_pass_rate: f64,
    /// Records closer than this belong to the same dialing burst
    pub session_gap_secs: i64,
    pub stuck_ringing_secs: i64,
    pub stuck_in_progress_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Scheduled verification interval; 0 disables it
    pub verification_interval_secs: u64,
    /// Window audited by scheduled verification
    pub verification_window_secs: i64,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            parallel_lines: 3,
            amd_enabled: true,
            amd_sensitivity: AmdSensitivity::Standard,
            auto_skip_voicemail: true,
            aggressive_dialing: false,
            greeting_url: None,
            caller_id: "+15550000000".to_string(),
            scheduler: SchedulerConfig::default(),
            lines: LineConfig::default(),
            arbiter: ArbiterConfig::default(),
            verification: VerificationConfig::default(),
            database: DatabaseConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dial_rate_per_second: 1.0,
            aggressive_multiplier: 2.0,
            max_attempts: 3,
            tick_interval_ms: 250,
            hangup_on_stop: false,
            do_not_call: Vec::new(),
        }
    }
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            cool_down_ms: 3_000,
            max_line_age_secs: 600,
            max_bridged_age_secs: 2 * 60 * 60,
            watchdog_interval_ms: 5_000,
            disconnect_timeout_ms: 2_000,
        }
    }
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            race_window_ms: 150,
            notification_url: None,
            notification_max_attempts: 3,
            notification_initial_delay_ms: 200,
            notification_backoff_multiplier: 2.0,
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            integrity_pass_rate: 0.95,
            disposition_pass_rate: 0.95,
            drop_success_pass_rate: 0.95,
            session_gap_secs: 10,
            stuck_ringing_secs: 30 * 60,
            stuck_in_progress_secs: 2 * 60 * 60,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8090".to_string(),
            verification_interval_secs: 0,
            verification_window_secs: 24 * 60 * 60,
        }
    }
}

impl DialerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| DialerError::config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DialerError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.parallel_lines == 0 || self.parallel_lines > MAX_PARALLEL_LINES {
            return Err(DialerError::config(format!(
                "parallelLines must be between 1 and {}, got {}",
                MAX_PARALLEL_LINES, self.parallel_lines
            )));
        }
        if !(self.scheduler.dial_rate_per_second > 0.0) {
            return Err(DialerError::config("dialRatePerSecond must be positive"));
        }
        if self.scheduler.aggressive_multiplier < 1.0 {
            return Err(DialerError::config("aggressiveMultiplier must be at least 1.0"));
        }
        if self.scheduler.max_attempts == 0 {
            return Err(DialerError::config("maxAttempts must be at least 1"));
        }
        if self.scheduler.tick_interval_ms == 0 {
            return Err(DialerError::config("tickIntervalMs must be positive"));
        }
        if self.lines.watchdog_interval_ms == 0 || self.lines.max_line_age_secs == 0 {
            return Err(DialerError::config("watchdog interval and max line age must be positive"));
        }
        if self.lines.max_bridged_age_secs < self.lines.max_line_age_secs {
            return Err(DialerError::config("maxBridgedAgeSecs must not be below maxLineAgeSecs"));
        }
        if self.arbiter.notification_max_attempts == 0 {
            return Err(DialerError::config("notificationMaxAttempts must be at least 1"));
        }
        for rate in [
            self.verification.integrity_pass_rate,
            self.verification.disposition_pass_rate,
            self.verification.drop_success_pass_rate,
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(DialerError::config("verification pass rates must be within 0..=1"));
            }
        }
        if let Some(url) = &self.greeting_url {
            if url.trim().is_empty() {
                return Err(DialerError::config("greetingUrl must not be empty when set"));
            }
        }
        Ok(())
    }

    /// Dials per second after applying aggressive mode
    pub fn effective_dial_rate(&self) -> f64 {
        if self.aggressive_dialing {
            self.scheduler.dial_rate_per_second * self.scheduler.aggressive_multiplier
        } else {
            self.scheduler.dial_rate_per_second
        }
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.lines.cool_down_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.tick_interval_ms)
    }

    pub fn race_window(&self) -> Duration {
        Duration::from_millis(self.arbiter.race_window_ms)
    }

    pub fn max_line_age(&self) -> Duration {
        Duration::from_secs(self.lines.max_line_age_secs)
    }

    pub fn max_bridged_age(&self) -> Duration {
        Duration::from_secs(self.lines.max_bridged_age_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.lines.watchdog_interval_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.lines.disconnect_timeout_ms)
    }

    /// Retry policy for rejection notifications
    pub fn notification_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.arbiter.notification_max_attempts,
            initial_delay: Duration::from_millis(self.arbiter.notification_initial_delay_ms),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: self.arbiter.notification_backoff_multiplier,
            use_jitter: false,
        }
    }
}
