use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Auth Method ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Key,
    Password,
    Agent,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key => write!(f, "key"),
            Self::Password => write!(f, "password"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

impl std::str::FromStr for AuthMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "key" => Ok(Self::Key),
            "password" => Ok(Self::Password),
            "agent" => Ok(Self::Agent),
            other => Err(format!("unknown auth_method '{other}'")),
        }
    }
}

// ── Session configuration (immutable) ───────────────────────────

/// The validated, read-only configuration a `Session` is constructed from.
///
/// Constructed once by the handler that services `ssh_connect`; never mutated
/// afterward. Field-level validation (port range, timeout bounds, auth-method
/// specific requirements) happens before a value of this type is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub timeout_secs: u32,
    pub auth_method: AuthMethod,
    pub key_path: Option<String>,
    pub password: Option<String>,
}

/// Globally unique, never reused. A `SessionHandle` is an ownership token:
/// holding one grants the right to operate on that session and to destroy it.
pub type SessionHandle = String;

pub fn new_handle() -> SessionHandle {
    Uuid::new_v4().to_string()
}

// ── Command result ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub execution_time: f64,
    pub timestamp: DateTime<Utc>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn has_output(&self) -> bool {
        !self.stdout.is_empty() || !self.stderr.is_empty()
    }
}

// ── Directory entry ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    File,
    Directory,
    Unknown,
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Directory => write!(f, "directory"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub size: Option<u64>,
    /// Octal permission string, three digits (e.g. "755").
    pub permissions: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    pub owner: Option<u32>,
    pub group: Option<u32>,
}

// ── Connection info (the snapshot returned by ssh_list_connections) ─

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub connection_id: SessionHandle,
    pub hostname: String,
    pub username: String,
    pub port: u16,
    pub connected: bool,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    /// Supplemental fields beyond the minimal record: consecutive failed
    /// health probes, reconnect attempts in the current loss episode, and
    /// whether the session is currently considered lost.
    pub health_failures: u32,
    pub reconnect_attempts: u32,
    pub is_lost: bool,
}

// ── Pool-level aggregate stats ──────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub running: bool,
    pub uptime_secs: f64,
    pub max_connections: usize,
    pub active_connections: usize,
    pub connected_count: usize,
    pub total_connections_created: u64,
    pub total_commands_executed: u64,
    pub health_check_interval_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_method_round_trips_through_display_and_from_str() {
        for m in [AuthMethod::Key, AuthMethod::Password, AuthMethod::Agent] {
            let s = m.to_string();
            assert_eq!(s.parse::<AuthMethod>().unwrap(), m);
        }
    }

    #[test]
    fn auth_method_rejects_unknown_strings() {
        assert!("teleport".parse::<AuthMethod>().is_err());
    }

    #[test]
    fn command_result_derives_success_and_has_output() {
        let r = CommandResult {
            command: "echo hi".into(),
            stdout: "hi\n".into(),
            stderr: String::new(),
            exit_code: 0,
            execution_time: 0.01,
            timestamp: Utc::now(),
        };
        assert!(r.success());
        assert!(r.has_output());
    }

    #[test]
    fn command_result_no_output_when_both_streams_empty() {
        let r = CommandResult {
            command: "true".into(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            execution_time: 0.01,
            timestamp: Utc::now(),
        };
        assert!(!r.has_output());
    }

    #[test]
    fn new_handle_is_unique() {
        assert_ne!(new_handle(), new_handle());
    }
}
