//! The bounded `handle -> Session` map, admission control, and background
//! health monitor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sshmux_errors::McpError;
use sshmux_session::Session;
use sshmux_types::{CommandResult, ConnectionInfo, DirectoryEntry, PoolStats, SessionConfig, SessionHandle};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection limit reached ({current} of {max})")]
    LimitReached { current: usize, max: usize },
    #[error("connection not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Connection(#[from] McpError),
}

impl From<PoolError> for McpError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::LimitReached { current, max } => McpError::tool_error(
                format!("Connection limit reached ({current} of {max})"),
                Some(serde_json::json!({"current": current, "max": max})),
            ),
            PoolError::NotFound(handle) => McpError::tool_error(
                "Connection not found",
                Some(serde_json::json!({"connection_id": handle})),
            ),
            PoolError::Connection(inner) => inner,
        }
    }
}

const DEFAULT_MAX_CONNECTIONS: usize = 10;
const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

struct PoolState {
    sessions: RwLock<HashMap<SessionHandle, Arc<Session>>>,
}

/// The connection pool. Cheap to clone (wraps an `Arc`); share one instance
/// between the Dispatcher and the background monitor task.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    state: PoolState,
    max_connections: usize,
    health_check_interval: Duration,
    running: AtomicBool,
    started_at: RwLock<Option<DateTime<Utc>>>,
    total_created: AtomicU64,
    total_commands: AtomicU64,
    monitor: RwLock<Option<JoinHandle<()>>>,
}

impl Pool {
    pub fn new(max_connections: usize, health_check_interval: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: PoolState {
                    sessions: RwLock::new(HashMap::new()),
                },
                max_connections,
                health_check_interval,
                running: AtomicBool::new(false),
                started_at: RwLock::new(None),
                total_created: AtomicU64::new(0),
                total_commands: AtomicU64::new(0),
                monitor: RwLock::new(None),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_CONNECTIONS, DEFAULT_HEALTH_CHECK_INTERVAL)
    }

    /// Idempotent: launches the background monitor task if not already
    /// running.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.inner.started_at.write().await = Some(Utc::now());

        let pool = self.clone();
        let handle = tokio::spawn(async move {
            pool.monitor_loop().await;
        });
        *self.inner.monitor.write().await = Some(handle);
        tracing::info!("ssh pool monitor started");
    }

    /// Idempotent: cancels the monitor, then disconnects every session
    /// concurrently.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.inner.monitor.write().await.take() {
            handle.abort();
        }
        let disconnected = self.disconnect_all().await;
        tracing::info!(disconnected, "ssh pool stopped");
    }

    async fn monitor_loop(&self) {
        loop {
            tokio::time::sleep(self.inner.health_check_interval).await;
            if !self.inner.running.load(Ordering::SeqCst) {
                break;
            }

            let sessions: Vec<Arc<Session>> = self.inner.state.sessions.read().await.values().cloned().collect();
            let interval = self.inner.health_check_interval;
            let due = futures::future::join_all(sessions.iter().map(|s| s.needs_health_check(interval))).await;
            let due_sessions: Vec<&Arc<Session>> = sessions
                .iter()
                .zip(due.iter())
                .filter_map(|(s, due)| due.then_some(s))
                .collect();

            let checks = due_sessions.iter().map(|s| s.health_check());
            let results = futures::future::join_all(checks).await;

            let healthy = results.iter().filter(|ok| **ok).count();
            let lost = results.len() - healthy;
            if lost > 0 {
                tracing::warn!(healthy, lost, "monitor detected unhealthy sessions");
                let reconnected = self.attempt_reconnect_all_lost().await;
                let cleaned = self.cleanup_unhealthy_connections().await;
                tracing::info!(reconnected = reconnected.len(), cleaned, "monitor recovery pass complete");
            }
        }
    }

    /// Releases the lock across the network `connect()` call so a slow
    /// authentication doesn't block unrelated pool operations; the pool may
    /// transiently admit more than `max_connections` under concurrent
    /// creation, bounded by the number of racing callers.
    pub async fn create_connection(&self, config: SessionConfig) -> Result<SessionHandle, PoolError> {
        {
            let sessions = self.inner.state.sessions.read().await;
            if sessions.len() >= self.inner.max_connections {
                return Err(PoolError::LimitReached {
                    current: sessions.len(),
                    max: self.inner.max_connections,
                });
            }
        }

        let handle = sshmux_types::new_handle();
        let session = Arc::new(Session::new(handle.clone(), config));
        session.connect().await?;

        self.inner.state.sessions.write().await.insert(handle.clone(), session);
        self.inner.total_created.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    pub async fn get_connection(&self, handle: &str) -> Option<Arc<Session>> {
        self.inner.state.sessions.read().await.get(handle).cloned()
    }

    pub async fn disconnect_connection(&self, handle: &str) -> bool {
        let session = self.inner.state.sessions.write().await.remove(handle);
        match session {
            Some(session) => {
                session.disconnect().await;
                true
            }
            None => false,
        }
    }

    /// Snapshot-under-lock, disconnect-out-of-lock, clear-under-lock — the
    /// ordering this recovers from the source's inconsistent behaviour.
    pub async fn disconnect_all(&self) -> usize {
        let snapshot: Vec<Arc<Session>> = self.inner.state.sessions.read().await.values().cloned().collect();
        let count = snapshot.len();
        futures::future::join_all(snapshot.iter().map(|s| s.disconnect())).await;
        self.inner.state.sessions.write().await.clear();
        count
    }

    pub async fn execute_command(
        &self,
        handle: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, PoolError> {
        let session = self
            .get_connection(handle)
            .await
            .ok_or_else(|| PoolError::NotFound(handle.to_string()))?;
        let result = session.execute_command(command, timeout).await?;
        self.inner.total_commands.fetch_add(1, Ordering::Relaxed);
        Ok(result)
    }

    pub async fn read_file(&self, handle: &str, file_path: &str, encoding: &str) -> Result<String, PoolError> {
        let session = self
            .get_connection(handle)
            .await
            .ok_or_else(|| PoolError::NotFound(handle.to_string()))?;
        Ok(session.read_file(file_path, encoding).await?)
    }

    pub async fn write_file(
        &self,
        handle: &str,
        file_path: &str,
        content: &str,
        encoding: &str,
        create_dirs: bool,
    ) -> Result<usize, PoolError> {
        let session = self
            .get_connection(handle)
            .await
            .ok_or_else(|| PoolError::NotFound(handle.to_string()))?;
        Ok(session.write_file(file_path, content, encoding, create_dirs).await?)
    }

    pub async fn list_directory(
        &self,
        handle: &str,
        directory_path: &str,
        show_hidden: bool,
        detailed: bool,
    ) -> Result<Vec<DirectoryEntry>, PoolError> {
        let session = self
            .get_connection(handle)
            .await
            .ok_or_else(|| PoolError::NotFound(handle.to_string()))?;
        Ok(session.list_directory(directory_path, show_hidden, detailed).await?)
    }

    pub async fn list_connections(&self) -> Vec<ConnectionInfo> {
        let sessions: Vec<Arc<Session>> = self.inner.state.sessions.read().await.values().cloned().collect();
        futures::future::join_all(sessions.iter().map(|s| s.info())).await
    }

    pub async fn connection_status(&self, handle: &str) -> Option<ConnectionInfo> {
        match self.get_connection(handle).await {
            Some(session) => Some(session.info().await),
            None => None,
        }
    }

    pub async fn enable_auto_reconnect(&self, handle: &str) -> bool {
        match self.get_connection(handle).await {
            Some(session) => {
                session.set_auto_reconnect(true).await;
                true
            }
            None => false,
        }
    }

    pub async fn disable_auto_reconnect(&self, handle: &str) -> bool {
        match self.get_connection(handle).await {
            Some(session) => {
                session.set_auto_reconnect(false).await;
                true
            }
            None => false,
        }
    }

    pub async fn force_reconnect(&self, handle: &str) -> Result<(), PoolError> {
        let session = self
            .get_connection(handle)
            .await
            .ok_or_else(|| PoolError::NotFound(handle.to_string()))?;
        Ok(session.force_reconnect().await?)
    }

    /// Disconnects sessions that are (a) not connected and not set to
    /// auto-reconnect, or (b) lost with reconnect attempts exhausted.
    pub async fn cleanup_unhealthy_connections(&self) -> usize {
        let candidates: Vec<SessionHandle> = {
            let sessions = self.inner.state.sessions.read().await;
            let mut out = Vec::new();
            for (handle, session) in sessions.iter() {
                let connected = session.is_connected().await;
                let auto_reconnect = session.auto_reconnect().await;
                let lost = session.is_lost().await;
                let exhausted = session.reconnect_exhausted().await;
                if (!connected && !auto_reconnect) || (lost && exhausted) {
                    out.push(handle.clone());
                }
            }
            out
        };

        let mut cleaned = 0;
        for handle in candidates {
            if self.disconnect_connection(&handle).await {
                cleaned += 1;
            }
        }
        cleaned
    }

    pub async fn attempt_reconnect_all_lost(&self) -> HashMap<SessionHandle, bool> {
        let lost: Vec<(SessionHandle, Arc<Session>)> = {
            let sessions = self.inner.state.sessions.read().await;
            let mut out = Vec::new();
            for (handle, session) in sessions.iter() {
                if session.is_lost().await {
                    out.push((handle.clone(), session.clone()));
                }
            }
            out
        };

        let mut results = HashMap::new();
        for (handle, session) in lost {
            let ok = session.force_reconnect().await.is_ok();
            results.insert(handle, ok);
        }
        results
    }

    pub async fn len(&self) -> usize {
        self.inner.state.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> PoolStats {
        let sessions = self.inner.state.sessions.read().await;
        let mut connected_count = 0;
        for session in sessions.values() {
            if session.is_connected().await {
                connected_count += 1;
            }
        }
        let started_at = *self.inner.started_at.read().await;
        let uptime_secs = started_at.map(|s| (Utc::now() - s).num_milliseconds() as f64 / 1000.0).unwrap_or(0.0);

        PoolStats {
            running: self.inner.running.load(Ordering::SeqCst),
            uptime_secs,
            max_connections: self.inner.max_connections,
            active_connections: sessions.len(),
            connected_count,
            total_connections_created: self.inner.total_created.load(Ordering::Relaxed),
            total_commands_executed: self.inner.total_commands.load(Ordering::Relaxed),
            health_check_interval_secs: self.inner.health_check_interval.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_pool_is_empty() {
        let pool = Pool::with_defaults();
        assert!(pool.is_empty().await);
        assert_eq!(pool.len().await, 0);
    }

    #[tokio::test]
    async fn stop_before_start_is_a_safe_no_op() {
        let pool = Pool::with_defaults();
        pool.stop().await;
        pool.stop().await;
    }

    #[tokio::test]
    async fn disconnect_unknown_handle_returns_false() {
        let pool = Pool::with_defaults();
        assert!(!pool.disconnect_connection("nope").await);
    }

    #[tokio::test]
    async fn disconnect_all_on_empty_pool_returns_zero() {
        let pool = Pool::with_defaults();
        assert_eq!(pool.disconnect_all().await, 0);
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn create_connection_rejects_at_zero_capacity_before_any_network_attempt() {
        let pool = Pool::new(0, Duration::from_secs(60));
        let config = SessionConfig {
            hostname: "example.com".into(),
            port: 22,
            username: "deploy".into(),
            timeout_secs: 30,
            auth_method: sshmux_types::AuthMethod::Password,
            key_path: None,
            password: Some("pw".into()),
        };
        let err = pool.create_connection(config).await.unwrap_err();
        assert!(matches!(err, PoolError::LimitReached { current: 0, max: 0 }));
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn stats_report_capacity_and_zero_usage() {
        let pool = Pool::new(3, Duration::from_secs(30));
        let stats = pool.stats().await;
        assert_eq!(stats.max_connections, 3);
        assert_eq!(stats.active_connections, 0);
        assert!(!stats.running);
    }
}
