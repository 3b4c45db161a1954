//! Settings type definitions.
//!
//! All types use camelCase JSON and `#[serde(default)]`, so a settings file
//! only needs the fields it changes.

use std::time::Duration;

use council_core::{AdvisorId, FailurePolicy, FrameFormat};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CouncilSettings {
    pub advisors: AdvisorsSettings,
    pub stream: StreamSettings,
    pub turn: TurnSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

impl CouncilSettings {
    /// Reject values that would make the council unusable.
    pub fn validate(&self) -> Result<()> {
        for advisor in AdvisorId::ALL {
            let endpoint = &self.advisors.get(advisor).endpoint;
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(SettingsError::InvalidValue(format!(
                    "{advisor} endpoint must be an http(s) URL, got {endpoint:?}"
                )));
            }
        }
        if self.stream.idle_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "stream.idleTimeoutMs must be positive".into(),
            ));
        }
        if self.server.port == 0 {
            return Err(SettingsError::InvalidValue("server.port must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdvisorsSettings {
    pub a: AdvisorSettings,
    pub b: AdvisorSettings,
}

impl AdvisorsSettings {
    pub fn get(&self, advisor: AdvisorId) -> &AdvisorSettings {
        match advisor {
            AdvisorId::A => &self.a,
            AdvisorId::B => &self.b,
        }
    }

    pub fn get_mut(&mut self, advisor: AdvisorId) -> &mut AdvisorSettings {
        match advisor {
            AdvisorId::A => &mut self.a,
            AdvisorId::B => &mut self.b,
        }
    }
}

impl Default for AdvisorsSettings {
    fn default() -> Self {
        Self {
            a: AdvisorSettings {
                label: "Conservative".into(),
                endpoint: "http://localhost:5000/conservative".into(),
                format: FrameFormat::EventStream,
            },
            b: AdvisorSettings {
                label: "Unhinged".into(),
                endpoint: "http://localhost:5000/unhinged".into(),
                format: FrameFormat::EventStream,
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdvisorSettings {
    /// Display name used by the CLI.
    pub label: String,
    pub endpoint: String,
    pub format: FrameFormat,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    pub connect_timeout_ms: u64,
    /// Longest silence tolerated between two body reads.
    pub idle_timeout_ms: u64,
}

impl StreamSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            idle_timeout_ms: 90_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TurnSettings {
    /// Per-turn deadline. `None` or `0` waits for both advisors indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub failure_policy: FailurePolicy,
    /// Shown in place of (or next to) a failed advisor's content.
    pub failure_placeholder: String,
    /// Append a system message after a turn in which any advisor failed.
    pub announce_failures: bool,
    pub failure_announcement: String,
    pub allow_concurrent_turns: bool,
    /// System message appended when the conversation starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub welcome_message: Option<String>,
}

impl TurnSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            failure_policy: FailurePolicy::Discard,
            failure_placeholder: "This advisor could not answer.".into(),
            announce_failures: true,
            failure_announcement: "Sorry, an error occurred while processing responses.".into(),
            allow_concurrent_turns: false,
            welcome_message: Some(
                "Welcome to the AI Council! You have two advisors ready to help. Ask away!".into(),
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9091,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` takes precedence.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
