//! Core types shared across the dialer
//!
//! Provider vocabulary is normalized here: every provider answer maps onto
//! [`AnsweredBy`], every hangup cause onto [`EndReason`], and every finished
//! attempt onto exactly one canonical [`CallOutcome`]. Persisted lifecycle status
//! is a separate enum ([`RecordStatus`]) so that "busy" is never both a line state
//! and a disposition at once.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Slot index of a line in the pool, 1-based
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(pub usize);

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a contact owned by the external contact store
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(pub String);

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContactId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque provider call handle (call SID)
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallHandle(pub String);

impl fmt::Display for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CallHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A contact queued for dialing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    /// Attempts made before this session
    #[serde(default)]
    pub attempts: u32,
}

impl Contact {
    pub fn new(id: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            id: ContactId(id.into()),
            phone: phone.into(),
            name: None,
            company: None,
            job_title: None,
            attempts: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Who or what answered, as reported by answering machine detection
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnsweredBy {
    Human,
    Machine,
    Fax,
    Unknown,
}

impl AnsweredBy {
    /// Parse a provider AMD label (`human`, `machine_start`, `fax`, ...)
    pub fn parse(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase();
        match label.as_str() {
            "human" | "person" => Self::Human,
            "fax" => Self::Fax,
            l if l.starts_with("machine") || l == "voicemail" || l == "answering_machine" => {
                Self::Machine
            }
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Machine => "machine",
            Self::Fax => "fax",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AnsweredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answering machine detection sensitivity
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmdSensitivity {
    Low,
    #[default]
    Standard,
    High,
}

impl AmdSensitivity {
    /// Seconds the provider may spend deciding human vs machine
    pub fn detection_timeout_secs(&self) -> u32 {
        match self {
            Self::Low => 15,
            Self::Standard => 30,
            Self::High => 45,
        }
    }

    /// Continuous speech (ms) after which the provider reports a machine
    pub fn speech_threshold_ms(&self) -> u32 {
        match self {
            Self::Low => 3500,
            Self::Standard => 2400,
            Self::High => 1500,
        }
    }
}

/// The canonical outcome of one finished call attempt
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallOutcome {
    /// Human answered and the call completed
    Connected,
    Voicemail,
    Busy,
    NoAnswer,
    Canceled,
    Failed,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Voicemail => "voicemail",
            Self::Busy => "busy",
            Self::NoAnswer => "no-answer",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "connected" => Some(Self::Connected),
            "voicemail" => Some(Self::Voicemail),
            "busy" => Some(Self::Busy),
            "no-answer" => Some(Self::NoAnswer),
            "canceled" => Some(Self::Canceled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Persisted lifecycle status for an attempt that ended with this outcome
    pub fn record_status(&self) -> RecordStatus {
        match self {
            Self::Connected | Self::Voicemail => RecordStatus::Completed,
            Self::Busy => RecordStatus::Busy,
            Self::NoAnswer => RecordStatus::NoAnswer,
            Self::Canceled => RecordStatus::Canceled,
            Self::Failed => RecordStatus::Failed,
        }
    }

    /// Whether the contact may be dialed again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoAnswer | Self::Busy)
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call attempt ended
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    Busy,
    NoAnswer,
    Canceled,
    Voicemail,
    Failed,
    /// Lost the agent-bridge race
    AgentBusy,
    /// Recycled by the line watchdog
    WatchdogTimeout,
    /// Hung up because the session stopped
    SessionStopped,
    /// Provider refused the dial command
    DialRejected,
    /// Marked failed by verification cleanup
    CleanupStaleCall,
    Other(String),
}

impl EndReason {
    /// Parse a provider hangup status
    pub fn parse(status: &str) -> Self {
        let status = status.trim().to_ascii_lowercase().replace('_', "-");
        match status.as_str() {
            "completed" | "answered" | "hangup" | "normal" => Self::Completed,
            "busy" | "user-busy" => Self::Busy,
            "no-answer" | "noanswer" | "timeout" | "unanswered" => Self::NoAnswer,
            "canceled" | "cancelled" => Self::Canceled,
            "voicemail" | "machine" | "answering-machine" => Self::Voicemail,
            "failed" | "error" | "rejected" | "congestion" => Self::Failed,
            "agent-busy" => Self::AgentBusy,
            "cleanup-stale-call" => Self::CleanupStaleCall,
            _ => Self::Other(status),
        }
    }

    /// Hangup cause implied by a terminal provider status
    pub fn from_status(status: RecordStatus) -> Self {
        match status {
            RecordStatus::Completed => Self::Completed,
            RecordStatus::Busy => Self::Busy,
            RecordStatus::NoAnswer => Self::NoAnswer,
            RecordStatus::Canceled => Self::Canceled,
            _ => Self::Failed,
        }
    }

    /// Inverse of [`EndReason::as_str`], for values read back from storage
    pub fn from_stored(s: &str) -> Self {
        match s {
            "watchdog_timeout" => Self::WatchdogTimeout,
            "session_stopped" => Self::SessionStopped,
            "dial_rejected" => Self::DialRejected,
            "cleanup_stale_call" => Self::CleanupStaleCall,
            other => match Self::parse(other) {
                Self::Other(_) => Self::Other(other.to_string()),
                known => known,
            },
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Completed => "completed",
            Self::Busy => "busy",
            Self::NoAnswer => "no_answer",
            Self::Canceled => "canceled",
            Self::Voicemail => "voicemail",
            Self::Failed => "failed",
            Self::AgentBusy => "agent_busy",
            Self::WatchdogTimeout => "watchdog_timeout",
            Self::SessionStopped => "session_stopped",
            Self::DialRejected => "dial_rejected",
            Self::CleanupStaleCall => "cleanup_stale_call",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a persisted call record
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Busy,
    NoAnswer,
    Canceled,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Ringing => "ringing",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Busy => "busy",
            Self::NoAnswer => "no-answer",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "initiated" | "queued" => Some(Self::Initiated),
            "ringing" => Some(Self::Ringing),
            "in-progress" | "answered" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "busy" => Some(Self::Busy),
            "no-answer" => Some(Self::NoAnswer),
            "canceled" | "cancelled" => Some(Self::Canceled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Initiated | Self::Ringing | Self::InProgress)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one call line
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "state", content = "outcome")]
pub enum LineState {
    Idle,
    Dialing,
    Ringing,
    HumanDetected,
    MachineDetected,
    /// Bridged to the agent
    Connected,
    /// Terminal, waiting out the cool-down before returning to idle
    Finished(CallOutcome),
}

impl LineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dialing => "dialing",
            Self::Ringing => "ringing",
            Self::HumanDetected => "human-detected",
            Self::MachineDetected => "machine-detected",
            Self::Connected => "connected",
            Self::Finished(CallOutcome::Connected) => "completed",
            Self::Finished(outcome) => outcome.as_str(),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }

    /// Carrying a live provider call
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::Finished(_))
    }

    pub fn is_bridged(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
