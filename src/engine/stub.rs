//! Scripted in-process engine for tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use super::{
    types::EngineResult,
    worker::{UciWorker, WorkerTransport},
};

/// How the stub answers one `go`
pub(crate) enum Search {
    /// Emit these lines immediately
    Reply(Vec<String>),
    /// Say nothing until `stop`, then answer `bestmove a2a3`
    Hang,
    /// Die without a word
    Crash,
}

impl Search {
    pub(crate) fn reply(lines: &[&str]) -> Self {
        Search::Reply(lines.iter().map(|line| line.to_string()).collect())
    }
}

struct Script {
    searches: VecDeque<Search>,
    received: Vec<String>,
    mute_handshake: bool,
    fail_next_handshake: bool,
    max_multipv: u8,
    starts: usize,
}

/// Shared handle: the test keeps one, every engine built from it keeps another
#[derive(Clone)]
pub(crate) struct StubScript {
    inner: Arc<Mutex<Script>>,
}

impl StubScript {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Script {
                searches: VecDeque::new(),
                received: Vec::new(),
                mute_handshake: false,
                fail_next_handshake: false,
                max_multipv: 5,
                starts: 0,
            })),
        }
    }

    pub(crate) fn push(&self, search: Search) {
        self.inner.lock().unwrap().searches.push_back(search);
    }

    pub(crate) fn mute_handshake(&self) {
        self.inner.lock().unwrap().mute_handshake = true;
    }

    pub(crate) fn unmute_handshake(&self) {
        self.inner.lock().unwrap().mute_handshake = false;
    }

    /// The next engine built dies on `uci`
    pub(crate) fn fail_next_handshake(&self) {
        self.inner.lock().unwrap().fail_next_handshake = true;
    }

    pub(crate) fn set_max_multipv(&self, max: u8) {
        self.inner.lock().unwrap().max_multipv = max;
    }

    /// Every command the engine has processed so far
    pub(crate) fn received(&self) -> Vec<String> {
        self.inner.lock().unwrap().received.clone()
    }

    pub(crate) fn starts(&self) -> usize {
        self.inner.lock().unwrap().starts
    }

    /// Give the worker task time to drain commands nobody waits on
    pub(crate) async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    pub(crate) fn transport(&self) -> WorkerTransport {
        let script = self.clone();
        WorkerTransport::new(move || -> EngineResult<Box<dyn UciWorker>> {
            script.inner.lock().unwrap().starts += 1;
            Ok(Box::new(StubEngine {
                script: script.clone(),
                searching: false,
            }))
        })
    }
}

struct StubEngine {
    script: StubScript,
    searching: bool,
}

impl UciWorker for StubEngine {
    fn on_command(&mut self, command: &str, output: &mut Vec<String>) -> Result<(), String> {
        let mut script = self.script.inner.lock().unwrap();
        script.received.push(command.to_string());

        match command.split_whitespace().next() {
            Some("uci") if script.fail_next_handshake => {
                script.fail_next_handshake = false;
                return Err("stub engine failed to load".to_string());
            }
            Some("uci") if !script.mute_handshake => {
                output.push("id name Stub".to_string());
                output.push("id author Opening Coach".to_string());
                output.push(format!(
                    "option name MultiPV type spin default 1 min 1 max {}",
                    script.max_multipv
                ));
                output.push("uciok".to_string());
            }
            Some("isready") if !script.mute_handshake => output.push("readyok".to_string()),
            Some("go") => match script.searches.pop_front() {
                Some(Search::Reply(lines)) => output.extend(lines),
                Some(Search::Hang) | None => self.searching = true,
                Some(Search::Crash) => return Err("stub engine crashed".to_string()),
            },
            Some("stop") if self.searching => {
                self.searching = false;
                output.push("bestmove a2a3".to_string());
            }
            _ => {}
        }
        Ok(())
    }
}
