//! Lifecycle of the foreign-runtime sidecar process.
//!
//! The supervisor owns at most one child process. A watcher task holds the
//! child, forwards nothing but its exit status, and flips the state to
//! `Stopped` when the process goes away for any reason.

use crate::client::SidecarClient;
use reelhub_core::SidecarConfig;
use reqwest::StatusCode;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

/// Environment variable naming an explicit sidecar bundle.
pub const BUNDLE_ENV: &str = "REELHUB_SIDECAR";

const BUNDLE_STEM: &str = "reelhub-sidecar";
const HEALTH_RETRY_INTERVAL: Duration = Duration::from_millis(250);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("sidecar bundle not found (searched: {searched})")]
    BundleNotFound { searched: String },
    #[error("failed to spawn sidecar {path}: {source}")]
    Spawn { path: PathBuf, source: io::Error },
    #[error("sidecar unavailable: {0}")]
    Unavailable(String),
    #[error("sidecar request {path} failed: {message}")]
    Http { path: String, message: String },
    #[error("sidecar returned HTTP {status} for {path}")]
    Status { path: String, status: StatusCode },
    #[error("sidecar rejected request: {0}")]
    Rejected(String),
    #[error("malformed sidecar response from {path}: {message}")]
    Decode { path: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarState {
    NotStarted,
    Starting,
    Healthy,
    Unreachable,
    Stopped,
}

impl SidecarState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SidecarState::NotStarted => "not started",
            SidecarState::Starting => "starting",
            SidecarState::Healthy => "healthy",
            SidecarState::Unreachable => "unreachable",
            SidecarState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SidecarState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct RunningProcess {
    pid: Option<u32>,
    kill: oneshot::Sender<()>,
    watcher: JoinHandle<()>,
}

pub struct SidecarSupervisor {
    config: SidecarConfig,
    sidecar_dir: PathBuf,
    client: SidecarClient,
    state: Arc<StdMutex<SidecarState>>,
    process: Mutex<Option<RunningProcess>>,
}

impl SidecarSupervisor {
    pub fn new(config: SidecarConfig, sidecar_dir: PathBuf) -> Result<Self, SidecarError> {
        let client = SidecarClient::from_config(&config)?;
        Ok(Self::with_client(config, sidecar_dir, client))
    }

    /// Supervisor talking to the sidecar through `client`.
    pub fn with_client(config: SidecarConfig, sidecar_dir: PathBuf, client: SidecarClient) -> Self {
        Self {
            config,
            sidecar_dir,
            client,
            state: Arc::new(StdMutex::new(SidecarState::NotStarted)),
            process: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SidecarState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn client(&self) -> &SidecarClient {
        &self.client
    }

    /// Spawn the sidecar unless one is already running.
    pub async fn start(&self) -> Result<(), SidecarError> {
        let mut slot = self.process.lock().await;
        if let Some(running) = slot.as_ref() {
            if !running.watcher.is_finished() {
                tracing::debug!(pid = ?running.pid, "sidecar already running");
                return Ok(());
            }
        }

        let bundle = self.locate_bundle()?;
        let previous = self.set_state(SidecarState::Starting);
        tracing::info!(bundle = %bundle.display(), port = self.config.port, "starting sidecar");

        let mut child = match Command::new(&bundle)
            .arg("--port")
            .arg(self.config.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                self.set_state(previous);
                return Err(SidecarError::Spawn {
                    path: bundle,
                    source,
                });
            }
        };

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, "stderr");
        }

        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let state = Arc::clone(&self.state);
        let watcher = tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(error = %e, "failed to signal sidecar");
                    }
                    child.wait().await
                }
            };
            match status {
                Ok(status) => tracing::info!(%status, "sidecar exited"),
                Err(e) => tracing::warn!(error = %e, "failed to reap sidecar"),
            }
            *state.lock().unwrap_or_else(PoisonError::into_inner) = SidecarState::Stopped;
        });

        *slot = Some(RunningProcess {
            pid,
            kill: kill_tx,
            watcher,
        });
        Ok(())
    }

    /// Probe `GET /health` once and apply the resulting transition.
    pub async fn health_check(&self) -> bool {
        if self.state() == SidecarState::Stopped {
            return false;
        }
        match self.client.health().await {
            Ok(health) => {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if *state != SidecarState::Stopped {
                    if *state != SidecarState::Healthy {
                        tracing::info!(plugins = health.active_plugin_count, "sidecar healthy");
                    }
                    *state = SidecarState::Healthy;
                }
                true
            }
            Err(e) => {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if *state == SidecarState::Starting {
                    *state = SidecarState::Unreachable;
                }
                tracing::debug!(error = %e, state = %*state, "sidecar health probe failed");
                false
            }
        }
    }

    /// Make sure a healthy sidecar is available, starting it when allowed.
    pub async fn ensure_healthy(&self) -> Result<(), SidecarError> {
        if self.state() == SidecarState::Healthy || self.health_check().await {
            return Ok(());
        }

        match self.state() {
            SidecarState::NotStarted if self.config.autostart => self.start().await?,
            SidecarState::NotStarted => {
                return Err(SidecarError::Unavailable(
                    "sidecar is not running and autostart is disabled".to_string(),
                ))
            }
            SidecarState::Stopped => {
                return Err(SidecarError::Unavailable(
                    "sidecar was stopped".to_string(),
                ))
            }
            _ => {}
        }

        let grace = self.config.startup_grace();
        let deadline = Instant::now() + grace;
        loop {
            if self.health_check().await {
                return Ok(());
            }
            if self.state() == SidecarState::Stopped {
                return Err(SidecarError::Unavailable(
                    "sidecar exited during startup".to_string(),
                ));
            }
            if Instant::now() >= deadline {
                return Err(SidecarError::Unavailable(format!(
                    "sidecar did not become healthy within {grace:?}"
                )));
            }
            sleep(HEALTH_RETRY_INTERVAL).await;
        }
    }

    /// Terminate the process and wait (bounded) for it to exit.
    pub async fn stop(&self) {
        let mut slot = self.process.lock().await;
        if let Some(mut running) = slot.take() {
            tracing::info!(pid = ?running.pid, "stopping sidecar");
            let _ = running.kill.send(());
            if timeout(STOP_TIMEOUT, &mut running.watcher).await.is_err() {
                tracing::warn!(pid = ?running.pid, "sidecar did not exit in time; abandoning watcher");
                running.watcher.abort();
            }
        }
        self.set_state(SidecarState::Stopped);
    }

    /// Candidate bundle locations in search order.
    pub fn bundle_candidates(&self) -> Vec<PathBuf> {
        let file_name = format!("{BUNDLE_STEM}{}", std::env::consts::EXE_SUFFIX);
        let mut candidates = Vec::new();
        if let Some(explicit) = std::env::var_os(BUNDLE_ENV) {
            candidates.push(PathBuf::from(explicit));
        }
        candidates.extend(self.config.bundle_paths.iter().cloned());
        candidates.push(self.sidecar_dir.join(&file_name));
        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
        {
            candidates.push(exe_dir.join(&file_name));
        }
        candidates
    }

    fn locate_bundle(&self) -> Result<PathBuf, SidecarError> {
        let candidates = self.bundle_candidates();
        candidates
            .iter()
            .find(|path| path.is_file())
            .cloned()
            .ok_or_else(|| {
                let searched = candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                tracing::warn!(searched = %searched, "sidecar bundle not found");
                SidecarError::BundleNotFound { searched }
            })
    }

    fn set_state(&self, next: SidecarState) -> SidecarState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *state, next)
    }
}

fn forward_output<R>(reader: R, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: "reelhub::sidecar", stream, "{line}");
        }
    });
}
