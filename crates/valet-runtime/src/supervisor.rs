//! Worker process supervisor.
//!
//! Downloads a worker binary artifact, launches it detached with its port
//! injected through several env variable aliases, tracks the pid, and
//! terminates it on request. Liveness is probed on every status read so a
//! worker that died on its own self-heals the tracked state.

use rand::Rng;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use valet_core::error::{Result, ValetError};
use valet_core::types::WorkerStatus;

/// Random port range for the worker when no fixed port is configured.
const PORT_RANGE: std::ops::Range<u16> = 20000..40000;

/// Aliases the worker binary may read its listen port from.
const PORT_ENV_ALIASES: [&str; 4] = ["BINARY_PORT", "PORT", "SERVER_PORT", "PTERODACTYL_PORT"];

/// Pid liveness probe, injectable for tests.
pub trait PidProbe: Send + Sync {
    fn alive(&self, pid: u32) -> bool;
}

/// Probes liveness with a null signal.
pub struct SignalProbe;

impl PidProbe for SignalProbe {
    #[cfg(unix)]
    fn alive(&self, pid: u32) -> bool {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    #[cfg(not(unix))]
    fn alive(&self, _pid: u32) -> bool {
        false
    }
}

struct Tracked {
    pid: u32,
    port: u16,
    url: String,
}

pub struct WorkerSupervisor {
    inner: Mutex<Option<Tracked>>,
    client: reqwest::Client,
    scratch_dir: PathBuf,
    cleanup_delay: Duration,
    keep_artifact: bool,
    probe: Arc<dyn PidProbe>,
}

impl WorkerSupervisor {
    pub fn new(scratch_dir: PathBuf, cleanup_delay: Duration, keep_artifact: bool) -> Self {
        Self::with_probe(scratch_dir, cleanup_delay, keep_artifact, Arc::new(SignalProbe))
    }

    pub fn with_probe(
        scratch_dir: PathBuf,
        cleanup_delay: Duration,
        keep_artifact: bool,
        probe: Arc<dyn PidProbe>,
    ) -> Self {
        Self {
            inner: Mutex::new(None),
            client: reqwest::Client::new(),
            scratch_dir,
            cleanup_delay,
            keep_artifact,
            probe,
        }
    }

    /// Current worker status. Clears the tracked process first if it is no
    /// longer alive.
    pub async fn status(&self) -> WorkerStatus {
        let mut inner = self.inner.lock().await;
        if let Some(tracked) = inner.as_ref()
            && !self.probe.alive(tracked.pid)
        {
            tracing::warn!("⚠️ Worker process {} exited on its own", tracked.pid);
            *inner = None;
        }
        match inner.as_ref() {
            Some(tracked) => WorkerStatus {
                running: true,
                pid: Some(tracked.pid),
                url: tracked.url.clone(),
                port: Some(tracked.port),
            },
            None => WorkerStatus::default(),
        }
    }

    /// Download and launch the worker. Idempotent: if the tracked process is
    /// still alive, its status is returned without launching another.
    pub async fn start(&self, binary_url: &str, port_override: Option<u16>) -> Result<WorkerStatus> {
        if binary_url.is_empty() {
            return Err(ValetError::Supervisor("No worker binary URL".into()));
        }

        let mut inner = self.inner.lock().await;
        if let Some(tracked) = inner.as_ref() {
            if self.probe.alive(tracked.pid) {
                tracing::info!("Worker already running (pid {})", tracked.pid);
                return Ok(WorkerStatus {
                    running: true,
                    pid: Some(tracked.pid),
                    url: tracked.url.clone(),
                    port: Some(tracked.port),
                });
            }
            *inner = None;
        }

        let artifact = self.download(binary_url).await?;
        let port = choose_port(port_override);
        let pid = spawn_detached(&artifact, port)?;
        tracing::info!("📦 Worker launched: pid {pid}, port {port}");

        if !self.keep_artifact {
            let delay = self.cleanup_delay;
            let path = artifact.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::warn!("Artifact cleanup failed for {}: {e}", path.display());
                }
            });
        }

        let tracked = Tracked {
            pid,
            port,
            url: binary_url.to_string(),
        };
        let status = WorkerStatus {
            running: true,
            pid: Some(pid),
            url: tracked.url.clone(),
            port: Some(port),
        };
        *inner = Some(tracked);
        Ok(status)
    }

    /// Terminate the worker. No-op when nothing is tracked.
    pub async fn stop(&self) -> WorkerStatus {
        let mut inner = self.inner.lock().await;
        if let Some(tracked) = inner.take() {
            terminate(tracked.pid);
            tracing::info!("🛑 Worker stopped (pid {})", tracked.pid);
        }
        WorkerStatus::default()
    }

    /// The local base URL of the running worker, for the reverse proxy.
    pub async fn local_url(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .as_ref()
            .filter(|t| self.probe.alive(t.pid))
            .map(|t| format!("http://127.0.0.1:{}", t.port))
    }

    async fn download(&self, url: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let path = self.scratch_dir.join(format!("worker-{}", uuid::Uuid::new_v4()));

        tracing::info!("⬇️ Downloading worker binary from {url}");
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| ValetError::Supervisor(format!("Download failed: {e}")))?;
        if !response.status().is_success() {
            return Err(ValetError::Supervisor(format!(
                "Download failed: HTTP {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ValetError::Supervisor(format!("Download interrupted: {e}")))?;
        tokio::fs::write(&path, &bytes).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        }

        tracing::info!("Artifact saved: {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}

fn choose_port(port_override: Option<u16>) -> u16 {
    match port_override {
        Some(p) if p > 0 => p,
        _ => rand::thread_rng().gen_range(PORT_RANGE),
    }
}

/// Launch the artifact detached from this process: its own process group,
/// no inherited stdio, so it survives a supervisor restart.
fn spawn_detached(artifact: &std::path::Path, port: u16) -> Result<u32> {
    let mut command = std::process::Command::new(artifact);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    for alias in PORT_ENV_ALIASES {
        command.env(alias, port.to_string());
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command
        .spawn()
        .map_err(|e| ValetError::Supervisor(format!("Failed to launch worker: {e}")))?;
    Ok(child.id())
}

#[cfg(unix)]
fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}
