//! Telephony provider boundary
//!
//! The provider places and tears down calls; call progress comes back
//! asynchronously as [`ProviderEvent`](crate::events::ProviderEvent)s through the
//! [`EventBridge`](crate::bridge::EventBridge). Both commands must return quickly:
//! `dial` returns once the provider has accepted the call, not when it is answered.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DialerConfig;
use crate::error::Result;
use crate::types::{AmdSensitivity, CallHandle};

/// Per-call options passed to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialOptions {
    pub machine_detection: bool,
    pub amd_sensitivity: AmdSensitivity,
    pub machine_detection_timeout_secs: u32,
    pub speech_threshold_ms: u32,
    pub greeting_url: Option<String>,
    /// Seconds to ring before the provider gives up
    pub ring_timeout_secs: u32,
}

impl DialOptions {
    pub fn from_config(config: &DialerConfig) -> Self {
        Self {
            machine_detection: config.amd_enabled,
            amd_sensitivity: config.amd_sensitivity,
            machine_detection_timeout_secs: config.amd_sensitivity.detection_timeout_secs(),
            speech_threshold_ms: config.amd_sensitivity.speech_threshold_ms(),
            greeting_url: config.greeting_url.clone(),
            ring_timeout_secs: if config.aggressive_dialing { 20 } else { 30 },
        }
    }
}

/// Command side of the telephony provider
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// Place an outbound call and return its handle
    async fn dial(&self, number: &str, caller_id: &str, options: &DialOptions) -> Result<CallHandle>;

    /// Hang up a call; hanging up an already-ended call is not an error
    async fn disconnect(&self, handle: &CallHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_options_follow_policy() {
        let mut config = DialerConfig::default();
        config.amd_sensitivity = AmdSensitivity::High;
        config.aggressive_dialing = true;
        config.greeting_url = Some("https://cdn.example.com/hi.mp3".to_string());

        let options = DialOptions::from_config(&config);
        assert!(options.machine_detection);
        assert_eq!(options.machine_detection_timeout_secs, 45);
        assert_eq!(options.speech_threshold_ms, 1500);
        assert_eq!(options.ring_timeout_secs, 20);
        assert_eq!(options.greeting_url.as_deref(), Some("https://cdn.example.com/hi.mp3"));
    }
}
