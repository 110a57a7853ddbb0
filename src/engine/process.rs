use std::{future::Future, path::PathBuf};

use log::{debug, error, info, trace, warn};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    sync::mpsc,
};

use super::types::{EngineError, EngineResult, ENGINE_QUIT_GRACE};

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Raw lifecycle and output events of a transport, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Started,
    Line(String),
    Crashed(String),
}

/// Moves UCI text between the session and one engine instance
///
/// Implementations know nothing about chess. `send` never fails loudly: a
/// broken engine surfaces as a `TransportEvent::Crashed` on the event stream.
pub trait UciTransport: Send + 'static {
    /// Start the engine, trying fallback builds when the primary cannot be created
    fn start(
        &mut self,
    ) -> impl Future<Output = EngineResult<mpsc::UnboundedReceiver<TransportEvent>>> + Send;

    /// Write one command line; silently ignored when not running
    fn send(&mut self, command: &str) -> impl Future<Output = ()> + Send;

    /// Send `quit`, then force termination. Idempotent.
    fn stop(&mut self) -> impl Future<Output = ()> + Send;

    fn is_running(&self) -> bool;
}

/// Native engine binary driven over stdin/stdout
#[derive(Debug)]
pub struct ProcessTransport {
    candidates: Vec<PathBuf>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    active: Option<PathBuf>,
}

impl ProcessTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            candidates: vec![path.into()],
            child: None,
            stdin: None,
            active: None,
        }
    }

    /// Alternate build to try when the earlier ones fail to spawn
    pub fn with_fallback(mut self, path: impl Into<PathBuf>) -> Self {
        self.candidates.push(path.into());
        self
    }

    /// Path of the binary that is currently running
    pub fn active_path(&self) -> Option<&PathBuf> {
        self.active.as_ref()
    }

    fn spawn_engine_process(path: &PathBuf) -> std::io::Result<Child> {
        debug!("Spawning engine process: {:?}", path);

        let mut command = Command::new(path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            command.current_dir(parent);
        }
        command
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .env("TERM", "dumb")
            .kill_on_drop(true);

        #[cfg(target_os = "windows")]
        command.creation_flags(CREATE_NO_WINDOW);

        command.spawn()
    }

    fn spawn_stdout_reader(stdout: ChildStdout, events: mpsc::UnboundedSender<TransportEvent>) {
        tokio::spawn(async move {
            let mut lines = BufReader::with_capacity(1024, stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        trace!("Engine stdout: {}", line);
                        if events.send(TransportEvent::Line(line)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = events.send(TransportEvent::Crashed("engine closed its output".to_string()));
                        break;
                    }
                    Err(e) => {
                        let _ = events.send(TransportEvent::Crashed(format!("failed to read engine output: {}", e)));
                        break;
                    }
                }
            }
        });
    }

    fn spawn_stderr_handler(stderr: Option<ChildStderr>) {
        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut stderr_lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = stderr_lines.next_line().await {
                    warn!("Engine stderr: {}", line);
                }
            });
        }
    }
}

impl UciTransport for ProcessTransport {
    async fn start(&mut self) -> EngineResult<mpsc::UnboundedReceiver<TransportEvent>> {
        if self.is_running() {
            self.stop().await;
        }

        let mut failures = Vec::new();
        for path in &self.candidates {
            let mut child = match Self::spawn_engine_process(path) {
                Ok(child) => child,
                Err(e) => {
                    warn!("Failed to spawn engine process {:?}: {}", path, e);
                    failures.push(format!("{}: {}", path.display(), e));
                    continue;
                }
            };

            let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
                error!("Engine process {:?} has no stdio handles", path);
                let _ = child.kill().await;
                failures.push(format!("{}: missing stdio handles", path.display()));
                continue;
            };

            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(TransportEvent::Started);
            Self::spawn_stdout_reader(stdout, tx);
            Self::spawn_stderr_handler(child.stderr.take());

            info!("Engine process started: {:?}", path);
            self.active = Some(path.clone());
            self.stdin = Some(stdin);
            self.child = Some(child);
            return Ok(rx);
        }

        Err(EngineError::SpawnError(failures.join("; ")))
    }

    async fn send(&mut self, command: &str) {
        let Some(stdin) = self.stdin.as_mut() else {
            debug!("Engine not running, dropping command: {}", command);
            return;
        };

        let line = format!("{}\n", command);
        let result = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            // The stdout reader reports the crash
            warn!("Failed to send command '{}': {}", command, e);
        }
    }

    async fn stop(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            match stdin.write_all(b"quit\n").await {
                Ok(()) => {
                    let _ = stdin.flush().await;
                    debug!("Quit command sent");
                    tokio::time::sleep(ENGINE_QUIT_GRACE).await;
                }
                Err(e) => debug!("Failed to send quit command, engine already gone: {}", e),
            }
        }

        if let Some(mut child) = self.child.take() {
            match child.kill().await {
                Ok(()) => debug!("Engine process killed"),
                Err(e) => debug!("Failed to kill engine process: {}", e),
            }
            if let Err(e) = child.wait().await {
                warn!("Error waiting for engine process to die: {}", e);
            }
            info!("Engine process stopped: {:?}", self.active.take());
        }
    }

    fn is_running(&self) -> bool {
        self.child.is_some()
    }
}
