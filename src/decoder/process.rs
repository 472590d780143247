/*!
 * Lifecycle of the decoding engine subprocess.
 *
 * States: stopped → starting → running → stopping → stopped. At most one
 * engine process exists per manager. Engine stdout/stderr are forwarded to
 * the log from background tasks so they never block translation requests.
 */

use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::config::DecoderConfig;
use super::endpoint::DecoderEndpoint;
use crate::errors::DecoderError;

/// How long `stop` waits for residual output to drain
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Everything needed to launch the engine
#[derive(Debug, Clone)]
pub struct DecoderLaunch {
    pub executable: PathBuf,
    pub config_path: PathBuf,
    pub port: u16,
    pub threads: usize,
    pub beam_size: usize,
    pub log_level: String,
    pub extra_args: Vec<String>,
    pub startup_attempts: u32,
    pub startup_interval: Duration,
}

impl DecoderLaunch {
    /// Resolve a launch description from the model's decoder config
    pub fn from_config(executable: &Path, config: &DecoderConfig, model_dir: &Path) -> Self {
        Self {
            executable: executable.to_path_buf(),
            config_path: config.config_path(model_dir),
            port: config.port,
            threads: config.threads,
            beam_size: config.beam_size,
            log_level: config.log_level.clone(),
            extra_args: config.extra_args.clone(),
            startup_attempts: config.startup_attempts,
            startup_interval: config.startup_interval(),
        }
    }

    /// Command line arguments passed to the engine
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            self.config_path.to_string_lossy().into_owned(),
            "--port".to_string(),
            self.port.to_string(),
            "--cpu-threads".to_string(),
            self.threads.to_string(),
            "--beam-size".to_string(),
            self.beam_size.to_string(),
            "--log-level".to_string(),
            self.log_level.clone(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Owner of the engine subprocess
pub struct DecoderProcess {
    launch: DecoderLaunch,
    state: DecoderState,
    child: Option<Child>,
    monitors: Vec<JoinHandle<()>>,
}

impl DecoderProcess {
    pub fn new(launch: DecoderLaunch) -> Self {
        Self {
            launch,
            state: DecoderState::Stopped,
            child: None,
            monitors: Vec::new(),
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn launch(&self) -> &DecoderLaunch {
        &self.launch
    }

    /// Endpoint of the running engine
    pub fn endpoint(&self) -> DecoderEndpoint {
        DecoderEndpoint::local(self.launch.port)
    }

    /// Launch the engine and wait until it accepts connections
    pub async fn start(&mut self) -> Result<(), DecoderError> {
        if self.state == DecoderState::Running {
            debug!("Decoder already running (pid {:?})", self.pid());
            return Ok(());
        }

        if self.port_in_use().await {
            warn!(
                "Port {} already accepts connections before launch; a stale engine may answer instead of the new one",
                self.launch.port
            );
        }

        self.state = DecoderState::Starting;
        info!(
            "Starting decoder: {} {}",
            self.launch.executable.display(),
            self.launch.args().join(" ")
        );

        let mut child = match Command::new(&self.launch.executable)
            .args(self.launch.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.state = DecoderState::Stopped;
                return Err(DecoderError::StartFailed(format!(
                    "could not launch {}: {}",
                    self.launch.executable.display(),
                    e
                )));
            }
        };

        if let Some(stdout) = child.stdout.take() {
            self.monitors.push(tokio::spawn(forward_output(stdout)));
        }
        if let Some(stderr) = child.stderr.take() {
            self.monitors.push(tokio::spawn(forward_output(stderr)));
        }
        self.child = Some(child);

        match self.wait_until_ready().await {
            Ok(()) => {
                self.state = DecoderState::Running;
                info!("Decoder started (pid {:?}, port {})", self.pid(), self.launch.port);
                Ok(())
            }
            Err(e) => {
                error!("Decoder failed to start: {}", e);
                self.shutdown_child().await;
                self.state = DecoderState::Stopped;
                Err(e)
            }
        }
    }

    /// Whether something already listens on the engine port
    pub async fn port_in_use(&self) -> bool {
        TcpStream::connect(("localhost", self.launch.port)).await.is_ok()
    }

    async fn wait_until_ready(&mut self) -> Result<(), DecoderError> {
        let attempts = self.launch.startup_attempts.max(1);

        for attempt in 1..=attempts {
            tokio::time::sleep(self.launch.startup_interval).await;

            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    return Err(DecoderError::StartFailed(format!("engine exited with {}", status)));
                }
            }

            match TcpStream::connect(("localhost", self.launch.port)).await {
                Ok(_) => return Ok(()),
                Err(e) => debug!(
                    "Decoder not ready on port {} (attempt {}/{}): {}",
                    self.launch.port, attempt, attempts, e
                ),
            }
        }

        Err(DecoderError::StartFailed(format!(
            "engine not accepting connections on port {} after {} attempts",
            self.launch.port, attempts
        )))
    }

    /// Terminate the engine and drain its output; a no-op when stopped
    pub async fn stop(&mut self) {
        if self.state == DecoderState::Stopped && self.child.is_none() {
            return;
        }

        self.state = DecoderState::Stopping;
        self.shutdown_child().await;
        self.state = DecoderState::Stopped;
        info!("Decoder stopped");
    }

    /// Stop and start again
    pub async fn restart(&mut self) -> Result<(), DecoderError> {
        warn!("Restarting decoder");
        self.stop().await;
        self.start().await
    }

    async fn shutdown_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("Kill signal not delivered: {}", e);
            }
            match child.wait().await {
                Ok(status) => debug!("Decoder exited with {}", status),
                Err(e) => warn!("Could not reap decoder process: {}", e),
            }
        }

        for monitor in self.monitors.drain(..) {
            if tokio::time::timeout(DRAIN_TIMEOUT, monitor).await.is_err() {
                warn!("Decoder output did not drain within {:?}", DRAIN_TIMEOUT);
            }
        }
    }
}

async fn forward_output<R>(stream: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!("[decoder] {}", line),
            Ok(None) => break,
            Err(e) => {
                debug!("[decoder] output stream error: {}", e);
                break;
            }
        }
    }
}
