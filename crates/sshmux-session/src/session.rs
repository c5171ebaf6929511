//! One authenticated SSH transport plus its lifecycle state.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use russh::client::Handle;
use russh_sftp::client::SftpSession;
use sshmux_errors::McpError;
use sshmux_types::{CommandResult, ConnectionInfo, DirectoryEntry, EntryType, SessionConfig, SessionHandle};
use tokio::sync::Mutex;

use crate::auth;
use crate::transport::ClientHandler;

const DEFAULT_HEALTH_CHECK_TIMEOUT: StdDuration = StdDuration::from_secs(10);
const HEALTH_FAILURE_THRESHOLD: u32 = 3;
const MAX_RECONNECT_ATTEMPTS: u32 = 3;
const BASE_RECONNECT_DELAY_SECS: f64 = 5.0;
const RECONNECT_MULTIPLIER: f64 = 2.0;

/// Connection-reset signatures that make `execute_command` eligible for a
/// single automatic retry after a successful reconnect.
const RECOVERABLE_SIGNATURES: &[&str] = &["socket is closed", "connection lost", "broken pipe"];

struct SessionInner {
    client: Option<Handle<ClientHandler>>,
    connected: bool,
    last_activity: Option<DateTime<Utc>>,
    connection_start: Option<DateTime<Utc>>,
    health_failures: u32,
    last_health_check: Option<DateTime<Utc>>,
    auto_reconnect: bool,
    reconnect_attempts: u32,
    lost_at: Option<DateTime<Utc>>,
}

impl SessionInner {
    fn is_lost(&self) -> bool {
        self.lost_at.is_some()
    }
}

/// Owns one SSH transport and its reconnect/health-probe state. Construction
/// does not open a transport — `connect()` must be called explicitly, which
/// is what lets the Pool hand out a handle before the network round trip
/// completes.
pub struct Session {
    handle: SessionHandle,
    config: SessionConfig,
    created_at: DateTime<Utc>,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub fn new(handle: SessionHandle, config: SessionConfig) -> Self {
        Self {
            handle,
            config,
            created_at: Utc::now(),
            inner: Mutex::new(SessionInner {
                client: None,
                connected: false,
                last_activity: None,
                connection_start: None,
                health_failures: 0,
                last_health_check: None,
                auto_reconnect: true,
                reconnect_attempts: 0,
                lost_at: None,
            }),
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    pub async fn is_lost(&self) -> bool {
        self.inner.lock().await.is_lost()
    }

    pub async fn set_auto_reconnect(&self, enabled: bool) {
        self.inner.lock().await.auto_reconnect = enabled;
    }

    pub async fn auto_reconnect(&self) -> bool {
        self.inner.lock().await.auto_reconnect
    }

    pub async fn reconnect_exhausted(&self) -> bool {
        self.inner.lock().await.reconnect_attempts >= MAX_RECONNECT_ATTEMPTS
    }

    pub async fn info(&self) -> ConnectionInfo {
        let inner = self.inner.lock().await;
        ConnectionInfo {
            connection_id: self.handle.clone(),
            hostname: self.config.hostname.clone(),
            username: self.config.username.clone(),
            port: self.config.port,
            connected: inner.connected,
            created_at: self.created_at,
            last_used: inner.last_activity,
            health_failures: inner.health_failures,
            reconnect_attempts: inner.reconnect_attempts,
            is_lost: inner.is_lost(),
        }
    }

    /// Opens the transport and authenticates. On success marks the session
    /// connected and resets health/reconnect counters.
    pub async fn connect(&self) -> Result<(), McpError> {
        let mut inner = self.inner.lock().await;
        self.connect_locked(&mut inner).await
    }

    async fn connect_locked(&self, inner: &mut SessionInner) -> Result<(), McpError> {
        let russh_config = Arc::new(russh::client::Config {
            inactivity_timeout: Some(StdDuration::from_secs(self.config.timeout_secs as u64)),
            ..Default::default()
        });

        let addr = (self.config.hostname.as_str(), self.config.port);
        let mut handle = russh::client::connect(russh_config, addr, ClientHandler)
            .await
            .map_err(|e| {
                McpError::connection_error(
                    format!("SSH connection to {}:{} failed: {e}", self.config.hostname, self.config.port),
                    Some(serde_json::json!({"hostname": self.config.hostname, "port": self.config.port})),
                )
            })?;

        if let Err(auth_err) = auth::authenticate(&mut handle, &self.config).await {
            return Err(McpError::connection_error(
                format!("Authentication failed: {}", auth_err.message),
                auth_err.data,
            ));
        }

        inner.client = Some(handle);
        inner.connected = true;
        let now = Utc::now();
        inner.connection_start = Some(now);
        inner.last_activity = Some(now);
        inner.health_failures = 0;
        inner.lost_at = None;
        inner.reconnect_attempts = 0;

        tracing::info!(handle = %self.handle, hostname = %self.config.hostname, "ssh session connected");
        Ok(())
    }

    /// Always safe to call multiple times; closes the underlying client if
    /// present and ignores cleanup errors.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(client) = inner.client.take() {
            let _ = client
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
        }
        inner.connected = false;
        inner.connection_start = None;
        tracing::info!(handle = %self.handle, "ssh session disconnected");
    }

    async fn reconnect_once_locked(&self, inner: &mut SessionInner) -> Result<(), McpError> {
        if inner.reconnect_attempts >= MAX_RECONNECT_ATTEMPTS {
            return Err(McpError::connection_error(
                format!(
                    "reconnect attempts exhausted ({} of {})",
                    inner.reconnect_attempts, MAX_RECONNECT_ATTEMPTS
                ),
                None,
            ));
        }
        let attempt = inner.reconnect_attempts;
        inner.reconnect_attempts += 1;
        let delay_secs = BASE_RECONNECT_DELAY_SECS * RECONNECT_MULTIPLIER.powi(attempt as i32);
        tracing::warn!(
            handle = %self.handle,
            attempt = inner.reconnect_attempts,
            delay_secs,
            "attempting ssh reconnect"
        );
        tokio::time::sleep(StdDuration::from_secs_f64(delay_secs)).await;

        if let Some(old) = inner.client.take() {
            let _ = old.disconnect(russh::Disconnect::ByApplication, "", "en").await;
        }

        match self.connect_locked(inner).await {
            Ok(()) => Ok(()),
            Err(e) => {
                inner.lost_at = Some(Utc::now());
                inner.connected = false;
                Err(e)
            }
        }
    }

    /// Bypasses the normal attempt-count guard: zeroes the counter, marks the
    /// session lost, and performs exactly one reconnection attempt.
    pub async fn force_reconnect(&self) -> Result<(), McpError> {
        let mut inner = self.inner.lock().await;
        inner.reconnect_attempts = 0;
        if inner.lost_at.is_none() {
            inner.lost_at = Some(Utc::now());
        }
        if let Some(old) = inner.client.take() {
            let _ = old.disconnect(russh::Disconnect::ByApplication, "", "en").await;
        }
        match self.connect_locked(&mut inner).await {
            Ok(()) => Ok(()),
            Err(e) => {
                inner.reconnect_attempts = 1;
                Err(e)
            }
        }
    }

    /// Lightweight: true if there is no client or the session is already
    /// flagged lost. Distinct from `health_check`, which performs a real exec.
    pub async fn detect_connection_loss(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let lost = inner.client.is_none() || !inner.connected;
        if lost && inner.lost_at.is_none() {
            inner.lost_at = Some(Utc::now());
        }
        lost
    }

    /// True when no health check has ever run, or the last one is at least
    /// `interval` old — the gate the monitor loop consults before spending a
    /// round trip on `health_check`.
    pub async fn needs_health_check(&self, interval: StdDuration) -> bool {
        let inner = self.inner.lock().await;
        match inner.last_health_check {
            None => true,
            Some(last) => {
                let elapsed = Utc::now() - last;
                elapsed >= chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero())
            }
        }
    }

    /// Runs `echo 'health_check'` with a short timeout. Threshold failures
    /// mark the session lost and, if `auto_reconnect`, trigger a reconnect.
    pub async fn health_check(&self) -> bool {
        let result = self
            .exec_raw("echo 'health_check'", DEFAULT_HEALTH_CHECK_TIMEOUT)
            .await;

        let mut inner = self.inner.lock().await;
        inner.last_health_check = Some(Utc::now());

        match result {
            Ok((stdout, _, _)) if stdout.contains("health_check") => {
                inner.health_failures = 0;
                if inner.lost_at.is_some() {
                    inner.lost_at = None;
                    inner.reconnect_attempts = 0;
                }
                true
            }
            _ => {
                inner.health_failures += 1;
                if inner.health_failures >= HEALTH_FAILURE_THRESHOLD {
                    inner.connected = false;
                    if inner.lost_at.is_none() {
                        inner.lost_at = Some(Utc::now());
                    }
                    if inner.auto_reconnect {
                        drop(inner);
                        let mut inner = self.inner.lock().await;
                        let _ = self.reconnect_once_locked(&mut inner).await;
                    }
                }
                false
            }
        }
    }

    /// Runs a command against the remote session, retrying exactly once on a
    /// connection-lost signature after a successful reconnect.
    pub async fn execute_command(
        &self,
        command: &str,
        timeout: Option<StdDuration>,
    ) -> Result<CommandResult, McpError> {
        if command.trim().is_empty() {
            return Err(McpError::invalid_params("command must not be empty"));
        }
        let effective_timeout = timeout.unwrap_or(StdDuration::from_secs(self.config.timeout_secs as u64));

        self.ensure_connected_or_reconnect().await?;

        if self.detect_connection_loss().await {
            self.ensure_connected_or_reconnect().await?;
        }

        let start = std::time::Instant::now();
        match self.exec_raw(command, effective_timeout).await {
            Ok((stdout, stderr, exit_code)) => {
                let mut inner = self.inner.lock().await;
                inner.last_activity = Some(Utc::now());
                drop(inner);
                Ok(CommandResult {
                    command: command.to_string(),
                    stdout,
                    stderr,
                    exit_code,
                    execution_time: start.elapsed().as_secs_f64(),
                    timestamp: Utc::now(),
                })
            }
            Err(e) => {
                let recoverable = RECOVERABLE_SIGNATURES
                    .iter()
                    .any(|sig| e.message.to_lowercase().contains(sig));
                if !recoverable {
                    return Err(e);
                }
                {
                    let mut inner = self.inner.lock().await;
                    inner.connected = false;
                    if inner.lost_at.is_none() {
                        inner.lost_at = Some(Utc::now());
                    }
                }
                self.ensure_connected_or_reconnect().await?;
                let start = std::time::Instant::now();
                let (stdout, stderr, exit_code) = self.exec_raw(command, effective_timeout).await?;
                let mut inner = self.inner.lock().await;
                inner.last_activity = Some(Utc::now());
                drop(inner);
                Ok(CommandResult {
                    command: command.to_string(),
                    stdout,
                    stderr,
                    exit_code,
                    execution_time: start.elapsed().as_secs_f64(),
                    timestamp: Utc::now(),
                })
            }
        }
    }

    async fn ensure_connected_or_reconnect(&self) -> Result<(), McpError> {
        let needs_reconnect = {
            let inner = self.inner.lock().await;
            !inner.connected
        };
        if !needs_reconnect {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        if !inner.connected {
            if inner.auto_reconnect && inner.is_lost() {
                return self.reconnect_once_locked(&mut inner).await;
            }
            return Err(McpError::connection_error("Connection not established", None));
        }
        Ok(())
    }

    async fn exec_raw(
        &self,
        command: &str,
        timeout: StdDuration,
    ) -> Result<(String, String, i32), McpError> {
        let mut inner = self.inner.lock().await;
        let client = inner
            .client
            .as_mut()
            .ok_or_else(|| McpError::connection_error("Connection not established", None))?;

        let run = async {
            let mut channel = client
                .channel_open_session()
                .await
                .map_err(|e| McpError::connection_error(format!("failed to open channel: {e}"), None))?;
            channel
                .exec(true, command)
                .await
                .map_err(|e| McpError::connection_error(format!("failed to exec: {e}"), None))?;

            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            let mut exit_code: i32 = -1;

            loop {
                match channel.wait().await {
                    Some(russh::ChannelMsg::Data { ref data }) => stdout_buf.extend_from_slice(data),
                    Some(russh::ChannelMsg::ExtendedData { ref data, ext }) if ext == 1 => {
                        stderr_buf.extend_from_slice(data)
                    }
                    Some(russh::ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = exit_status as i32;
                    }
                    Some(_) => continue,
                    None => break,
                }
            }

            Ok::<_, McpError>((
                String::from_utf8_lossy(&stdout_buf).into_owned(),
                String::from_utf8_lossy(&stderr_buf).into_owned(),
                exit_code,
            ))
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(McpError::timeout_error(
                format!("command timed out after {}s", timeout.as_secs()),
                Some(serde_json::json!({"command": command})),
            )),
        }
    }

    async fn open_sftp(&self) -> Result<SftpSession, McpError> {
        let mut inner = self.inner.lock().await;
        let client = inner
            .client
            .as_mut()
            .ok_or_else(|| McpError::connection_error("Connection not established", None))?;
        let channel = client
            .channel_open_session()
            .await
            .map_err(|e| McpError::connection_error(format!("failed to open channel: {e}"), None))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| McpError::connection_error(format!("failed to request sftp subsystem: {e}"), None))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| McpError::connection_error(format!("failed to start sftp session: {e}"), None))
    }

    pub async fn read_file(&self, file_path: &str, encoding: &str) -> Result<String, McpError> {
        if file_path.trim().is_empty() {
            return Err(McpError::invalid_params("file_path must not be empty"));
        }
        self.ensure_connected_or_reconnect().await?;
        let sftp = self.open_sftp().await?;

        use tokio::io::AsyncReadExt;
        let mut file = sftp
            .open(file_path)
            .await
            .map_err(|e| McpError::file_not_found(format!("{file_path}: {e}"), None))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .await
            .map_err(|e| McpError::connection_error(format!("read failed: {e}"), None))?;

        if encoding.eq_ignore_ascii_case("utf-8") {
            String::from_utf8(buf).map_err(|e| {
                McpError::connection_error(format!("file is not valid utf-8: {e}"), None)
            })
        } else {
            Err(McpError::invalid_params(format!(
                "unsupported encoding '{encoding}'"
            )))
        }
    }

    pub async fn write_file(
        &self,
        file_path: &str,
        content: &str,
        encoding: &str,
        create_dirs: bool,
    ) -> Result<usize, McpError> {
        if file_path.trim().is_empty() {
            return Err(McpError::invalid_params("file_path must not be empty"));
        }
        if !encoding.eq_ignore_ascii_case("utf-8") {
            return Err(McpError::invalid_params(format!(
                "unsupported encoding '{encoding}'"
            )));
        }
        self.ensure_connected_or_reconnect().await?;

        if create_dirs {
            if let Some(parent) = std::path::Path::new(file_path).parent() {
                let parent = parent.to_string_lossy();
                if !parent.is_empty() {
                    let mkdir_cmd = format!("mkdir -p {parent}");
                    if let Err(e) = self.exec_raw(&mkdir_cmd, StdDuration::from_secs(10)).await {
                        tracing::warn!(handle = %self.handle, error = %e.message, "mkdir -p failed, continuing");
                    }
                }
            }
        }

        let sftp = self.open_sftp().await?;
        use tokio::io::AsyncWriteExt;
        let mut file = sftp
            .create(file_path)
            .await
            .map_err(|e| McpError::permission_error(format!("{file_path}: {e}"), None))?;
        let bytes = content.as_bytes();
        file.write_all(bytes)
            .await
            .map_err(|e| McpError::connection_error(format!("write failed: {e}"), None))?;
        Ok(bytes.len())
    }

    pub async fn list_directory(
        &self,
        directory_path: &str,
        show_hidden: bool,
        detailed: bool,
    ) -> Result<Vec<DirectoryEntry>, McpError> {
        if directory_path.trim().is_empty() {
            return Err(McpError::invalid_params("directory_path must not be empty"));
        }
        self.ensure_connected_or_reconnect().await?;
        let sftp = self.open_sftp().await?;

        let raw_entries = sftp
            .read_dir(directory_path)
            .await
            .map_err(|e| McpError::file_not_found(format!("{directory_path}: {e}"), None))?;

        let mut entries: Vec<DirectoryEntry> = raw_entries
            .filter(|entry| show_hidden || !entry.file_name().starts_with('.'))
            .map(|entry| {
                let attrs = entry.metadata();
                if detailed {
                    DirectoryEntry {
                        name: entry.file_name(),
                        entry_type: if attrs.is_dir() {
                            EntryType::Directory
                        } else if attrs.is_regular() {
                            EntryType::File
                        } else {
                            EntryType::Unknown
                        },
                        size: attrs.size,
                        permissions: attrs.permissions.map(|p| format!("{:03o}", p & 0o777)),
                        modified: attrs
                            .mtime
                            .and_then(|t| DateTime::<Utc>::from_timestamp(t as i64, 0)),
                        owner: attrs.uid,
                        group: attrs.gid,
                    }
                } else {
                    DirectoryEntry {
                        name: entry.file_name(),
                        entry_type: EntryType::Unknown,
                        size: None,
                        permissions: None,
                        modified: None,
                        owner: None,
                        group: None,
                    }
                }
            })
            .collect();

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sshmux_types::AuthMethod;

    fn config() -> SessionConfig {
        SessionConfig {
            hostname: "127.0.0.1".into(),
            port: 2222,
            username: "test".into(),
            timeout_secs: 5,
            auth_method: AuthMethod::Password,
            key_path: None,
            password: Some("pw".into()),
        }
    }

    #[tokio::test]
    async fn construction_does_not_connect() {
        let session = Session::new(sshmux_types::new_handle(), config());
        assert!(!session.is_connected().await);
    }

    #[tokio::test]
    async fn execute_command_rejects_empty_command_before_touching_transport() {
        let session = Session::new(sshmux_types::new_handle(), config());
        let err = session.execute_command("   ", None).await.unwrap_err();
        assert_eq!(err.kind, sshmux_errors::ErrorKind::InvalidParams);
    }

    #[tokio::test]
    async fn disconnect_is_safe_to_call_before_connect() {
        let session = Session::new(sshmux_types::new_handle(), config());
        session.disconnect().await;
        session.disconnect().await;
        assert!(!session.is_connected().await);
    }

    #[tokio::test]
    async fn needs_health_check_is_true_before_any_check_has_run() {
        let session = Session::new(sshmux_types::new_handle(), config());
        assert!(session.needs_health_check(StdDuration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn needs_health_check_is_false_immediately_after_a_recent_check() {
        let session = Session::new(sshmux_types::new_handle(), config());
        {
            let mut inner = session.inner.lock().await;
            inner.last_health_check = Some(Utc::now());
        }
        assert!(!session.needs_health_check(StdDuration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn needs_health_check_is_true_once_the_interval_has_elapsed() {
        let session = Session::new(sshmux_types::new_handle(), config());
        {
            let mut inner = session.inner.lock().await;
            inner.last_health_check = Some(Utc::now() - chrono::Duration::seconds(120));
        }
        assert!(session.needs_health_check(StdDuration::from_secs(60)).await);
    }
}
