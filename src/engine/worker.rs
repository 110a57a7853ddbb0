//! In-process engine transport.
//!
//! A [`UciWorker`] is an engine that lives inside this process (an embedded
//! engine, a scripted stub, a remote proxy) and speaks the same line protocol
//! as a native binary. [`WorkerTransport`] runs it on its own task and feeds
//! it commands over a channel, so the session cannot tell it apart from a
//! [`ProcessTransport`](super::process::ProcessTransport).

use log::{debug, info, warn};
use tokio::{sync::mpsc, task::JoinHandle};

use super::{
    process::{TransportEvent, UciTransport},
    types::{EngineError, EngineResult},
};

/// An engine that handles one UCI command at a time
pub trait UciWorker: Send + 'static {
    /// Handle `command`, pushing any output lines onto `output`.
    ///
    /// Returning `Err` terminates the worker; the message is reported as a crash
    /// after the lines already pushed.
    fn on_command(&mut self, command: &str, output: &mut Vec<String>) -> Result<(), String>;
}

/// Builds a fresh worker for every `start()`
pub type WorkerFactory = Box<dyn Fn() -> EngineResult<Box<dyn UciWorker>> + Send + Sync>;

pub struct WorkerTransport {
    builds: Vec<WorkerFactory>,
    commands: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl WorkerTransport {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> EngineResult<Box<dyn UciWorker>> + Send + Sync + 'static,
    {
        Self {
            builds: vec![Box::new(factory)],
            commands: None,
            task: None,
        }
    }

    /// Alternate build to try when the earlier ones fail to start
    pub fn with_fallback<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> EngineResult<Box<dyn UciWorker>> + Send + Sync + 'static,
    {
        self.builds.push(Box::new(factory));
        self
    }

    async fn run(
        mut worker: Box<dyn UciWorker>,
        mut commands: mpsc::UnboundedReceiver<String>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) {
        while let Some(command) = commands.recv().await {
            let mut output = Vec::new();
            let result = worker.on_command(&command, &mut output);
            for line in output {
                if events.send(TransportEvent::Line(line)).is_err() {
                    return;
                }
            }
            if let Err(message) = result {
                warn!("Engine worker failed: {}", message);
                let _ = events.send(TransportEvent::Crashed(message));
                return;
            }
            if command == "quit" {
                break;
            }
        }
        debug!("Engine worker finished");
    }
}

impl UciTransport for WorkerTransport {
    async fn start(&mut self) -> EngineResult<mpsc::UnboundedReceiver<TransportEvent>> {
        if self.is_running() {
            self.stop().await;
        }

        let mut failures = Vec::new();
        for (index, build) in self.builds.iter().enumerate() {
            let worker = match build() {
                Ok(worker) => worker,
                Err(e) => {
                    warn!("Engine worker build {} failed: {}", index, e);
                    failures.push(e.to_string());
                    continue;
                }
            };

            let (command_tx, command_rx) = mpsc::unbounded_channel();
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let _ = event_tx.send(TransportEvent::Started);
            self.task = Some(tokio::spawn(Self::run(worker, command_rx, event_tx)));
            self.commands = Some(command_tx);
            info!("Engine worker started (build {})", index);
            return Ok(event_rx);
        }

        Err(EngineError::SpawnError(failures.join("; ")))
    }

    async fn send(&mut self, command: &str) {
        match &self.commands {
            Some(commands) => {
                if commands.send(command.to_string()).is_err() {
                    debug!("Engine worker gone, dropping command: {}", command);
                }
            }
            None => debug!("Engine worker not running, dropping command: {}", command),
        }
    }

    async fn stop(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send("quit".to_string());
        }
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Engine worker terminated");
        }
    }

    fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl UciWorker for Echo {
        fn on_command(&mut self, command: &str, output: &mut Vec<String>) -> Result<(), String> {
            if command == "boom" {
                return Err("worker panicked".to_string());
            }
            output.push(format!("echo {}", command));
            Ok(())
        }
    }

    #[tokio::test]
    async fn falls_back_to_second_build() {
        let mut transport = WorkerTransport::new(|| Err(EngineError::SpawnError("no wasm simd".to_string())))
            .with_fallback(|| Ok(Box::new(Echo) as Box<dyn UciWorker>));

        let mut events = transport.start().await.unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Started));
        transport.send("uci").await;
        assert_eq!(events.recv().await, Some(TransportEvent::Line("echo uci".to_string())));
        transport.stop().await;
        assert!(!transport.is_running());
    }

    #[tokio::test]
    async fn all_builds_failing_is_a_spawn_error() {
        let mut transport = WorkerTransport::new(|| Err(EngineError::SpawnError("missing".to_string())));
        assert!(matches!(transport.start().await, Err(EngineError::SpawnError(_))));
        transport.send("uci").await;
    }

    #[tokio::test]
    async fn worker_error_is_reported_as_crash() {
        let mut transport = WorkerTransport::new(|| Ok(Box::new(Echo) as Box<dyn UciWorker>));
        let mut events = transport.start().await.unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Started));
        transport.send("boom").await;
        assert_eq!(events.recv().await, Some(TransportEvent::Crashed("worker panicked".to_string())));
    }
}
