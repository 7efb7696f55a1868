use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tether_core::ids::AppId;
use tether_settings::ProcessSettings;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::container;
use crate::logs::{ConsoleEntry, LogKind, LogLevel, LogStore};
use crate::signal::{kill_tree, Signal};

#[derive(Clone, Debug)]
pub struct ProcessConfig {
    pub stop_timeout: Duration,
    pub container_runtime: String,
    pub container_prefix: String,
    pub volume_prefix: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::from(&ProcessSettings::default())
    }
}

impl From<&ProcessSettings> for ProcessConfig {
    fn from(settings: &ProcessSettings) -> Self {
        Self {
            stop_timeout: Duration::from_millis(settings.stop_timeout_ms),
            container_runtime: settings.container_runtime.clone(),
            container_prefix: settings.container_prefix.clone(),
            volume_prefix: settings.volume_prefix.clone(),
        }
    }
}

/// Identity of one recorded run. Run numbers only grow, so a handle from an
/// earlier run never equals the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunHandle(u64);

impl RunHandle {
    pub fn run_number(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    Host,
    Container { name: String },
}

#[derive(Clone)]
struct RunningApp {
    handle: RunHandle,
    pid: Option<u32>,
    mode: ExecutionMode,
    exited: watch::Receiver<bool>,
}

/// Tracks the running process of each app and stops it on request.
#[derive(Clone)]
pub struct ProcessManager {
    config: Arc<ProcessConfig>,
    apps: Arc<DashMap<AppId, RunningApp>>,
    run_counter: Arc<AtomicU64>,
    logs: LogStore,
}

impl ProcessManager {
    pub fn new(config: ProcessConfig, logs: LogStore) -> Self {
        Self {
            config: Arc::new(config),
            apps: Arc::new(DashMap::new()),
            run_counter: Arc::new(AtomicU64::new(0)),
            logs,
        }
    }

    pub fn logs(&self) -> &LogStore {
        &self.logs
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Number of runs recorded so far.
    pub fn run_count(&self) -> u64 {
        self.run_counter.load(Ordering::SeqCst)
    }

    /// Record a process spawned directly on the host.
    pub fn record_host(&self, app_id: AppId, child: Child) -> RunHandle {
        self.record(app_id, child, ExecutionMode::Host)
    }

    /// Record the client process of a containerized app. Without a name the
    /// container is assumed to be `{container_prefix}-{app_id}`.
    pub fn record_container(&self, app_id: AppId, child: Child, name: Option<String>) -> RunHandle {
        let name = name.unwrap_or_else(|| self.default_container_name(app_id));
        self.record(app_id, child, ExecutionMode::Container { name })
    }

    pub fn default_container_name(&self, app_id: AppId) -> String {
        format!("{}-{app_id}", self.config.container_prefix)
    }

    fn record(&self, app_id: AppId, mut child: Child, mode: ExecutionMode) -> RunHandle {
        let handle = RunHandle(self.run_counter.fetch_add(1, Ordering::SeqCst) + 1);
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            self.capture(app_id, stdout, LogLevel::Info);
        }
        if let Some(stderr) = child.stderr.take() {
            self.capture(app_id, stderr, LogLevel::Error);
        }

        let (exited_tx, exited) = watch::channel(false);
        let previous = self.apps.insert(
            app_id,
            RunningApp {
                handle,
                pid,
                mode: mode.clone(),
                exited,
            },
        );
        if let Some(previous) = previous {
            debug!(%app_id, superseded = previous.handle.0, "replacing running app record");
        }

        let manager = self.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            let _ = exited_tx.send(true);
            match status {
                Ok(status) => debug!(%app_id, run = handle.0, code = ?status.code(), "app process exited"),
                Err(e) => warn!(%app_id, run = handle.0, error = %e, "failed waiting on app process"),
            }
            manager.remove_if_current(app_id, handle);
        });

        info!(%app_id, run = handle.0, ?pid, ?mode, "recorded app process");
        handle
    }

    fn capture<R>(&self, app_id: AppId, stream: R, level: LogLevel)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let logs = self.logs.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                logs.add(ConsoleEntry::new(app_id, level, LogKind::Server, line));
            }
        });
    }

    pub fn is_running(&self, app_id: AppId) -> bool {
        self.apps.contains_key(&app_id)
    }

    pub fn current_handle(&self, app_id: AppId) -> Option<RunHandle> {
        self.apps.get(&app_id).map(|app| app.handle)
    }

    pub fn mode_of(&self, app_id: AppId) -> Option<ExecutionMode> {
        self.apps.get(&app_id).map(|app| app.mode.clone())
    }

    pub fn running_apps(&self) -> Vec<AppId> {
        let mut ids: Vec<AppId> = self.apps.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Remove the record for `app_id` only if it still belongs to `handle`.
    /// Returns whether a record was removed.
    pub fn remove_if_current(&self, app_id: AppId, handle: RunHandle) -> bool {
        let removed = self
            .apps
            .remove_if(&app_id, |_, app| app.handle == handle)
            .is_some();
        if removed {
            debug!(%app_id, run = handle.0, "removed app record");
        }
        removed
    }

    /// Stop the app's current run. Resolves even when nothing is recorded,
    /// when the process ignores the signal, or when the runtime is missing.
    pub async fn stop(&self, app_id: AppId) {
        let Some(app) = self.apps.get(&app_id).map(|entry| entry.value().clone()) else {
            debug!(%app_id, "stop requested for app with no running process");
            return;
        };

        match &app.mode {
            ExecutionMode::Host => self.stop_host(app_id, app.pid, app.exited).await,
            ExecutionMode::Container { name } => {
                container::stop_container(&self.config.container_runtime, name).await;
            }
        }

        self.remove_if_current(app_id, app.handle);
        info!(%app_id, run = app.handle.0, "app stopped");
    }

    async fn stop_host(&self, app_id: AppId, pid: Option<u32>, mut exited: watch::Receiver<bool>) {
        match pid {
            Some(pid) => {
                let signalled = tokio::task::spawn_blocking(move || kill_tree(pid, Signal::Term)).await;
                if let Err(e) = signalled {
                    warn!(%app_id, pid, error = %e, "tree kill task failed");
                }
            }
            None => warn!(%app_id, "cannot signal process tree: pid unknown"),
        }

        let closed_in_time = tokio::time::timeout(self.config.stop_timeout, exited.wait_for(|done| *done))
            .await
            .is_ok();
        if !closed_in_time {
            warn!(
                %app_id,
                ?pid,
                timeout_ms = self.config.stop_timeout.as_millis() as u64,
                "timeout waiting for process to close"
            );
        }
    }

    /// Remove the app's dependency-cache volume. Best effort.
    pub async fn remove_volumes(&self, app_id: AppId) {
        let volume = format!("{}-{app_id}", self.config.volume_prefix);
        container::remove_volume(&self.config.container_runtime, &volume).await;
    }

    /// Stop every recorded app.
    pub async fn stop_all(&self) {
        for app_id in self.running_apps() {
            self.stop(app_id).await;
        }
    }
}
