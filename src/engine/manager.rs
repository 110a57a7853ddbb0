use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Weak},
    time::Instant,
};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use log::{debug, error, info, trace, warn};
use tokio::{
    sync::{mpsc, oneshot, watch, Mutex},
    time::timeout,
};

use super::{
    communication::{is_move_token, parse_line, UciEvent},
    config::SessionConfig,
    process::{TransportEvent, UciTransport},
    types::{
        EngineError, EngineIdentity, EngineLog, EngineResult, RequestKind, Score, SessionState,
        MAX_CANDIDATES, MULTIPV_OPTION,
    },
};

type SharedInit = Shared<BoxFuture<'static, EngineResult<()>>>;

/// Collects `info multipv N pv ...` lines while a top-moves search runs
///
/// Later lines for a rank overwrite earlier ones: deeper iterations refine the line.
#[derive(Debug, Default, Clone)]
pub struct MultipvAccumulator {
    expected_count: u8,
    moves_by_rank: BTreeMap<u8, String>,
}

impl MultipvAccumulator {
    pub fn new(expected_count: u8) -> Self {
        Self {
            expected_count,
            moves_by_rank: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, rank: u8, uci_move: String) {
        if rank == 0 || rank > self.expected_count {
            trace!("Ignoring multipv rank {} (expected {})", rank, self.expected_count);
            return;
        }
        self.moves_by_rank.insert(rank, uci_move);
    }

    /// Moves for ranks `1..=expected_count` in rank order, skipping absent ranks
    pub fn assemble(&self) -> Vec<String> {
        (1..=self.expected_count)
            .filter_map(|rank| {
                let found = self.moves_by_rank.get(&rank).cloned();
                if found.is_none() {
                    warn!("Engine reported no line for multipv rank {}/{}", rank, self.expected_count);
                }
                found
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.moves_by_rank.clear();
    }
}

/// What a finished search produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    /// `None` when the engine answered `bestmove (none)`
    pub best_move: Option<String>,
    /// Top-moves searches only, in rank order
    pub candidates: Vec<String>,
    /// Last score reported for the rank 1 line, from the side to move
    pub score: Option<Score>,
}

/// The one outstanding request
struct PendingSearch {
    id: u64,
    kind: RequestKind,
    fen: String,
    deadline: Instant,
    reply: oneshot::Sender<EngineResult<SearchOutcome>>,
    accumulator: Option<MultipvAccumulator>,
    last_score: Option<Score>,
}

struct SessionCore<T> {
    transport: T,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    /// Bumped whenever a transport instance is started or torn down
    generation: u64,
    next_request_id: u64,
    pending: Option<PendingSearch>,
    /// `bestmove` lines still owed by searches we abandoned with `stop`
    stale_terminals: u32,
    /// Reply slot of the running handshake, tagged with its generation
    handshake: Option<(u64, oneshot::Sender<EngineResult<()>>)>,
    /// In-flight initialization shared by concurrent callers, tagged likewise
    init: Option<(u64, SharedInit)>,
    identity: EngineIdentity,
    transcript: VecDeque<EngineLog>,
}

impl<T: UciTransport> SessionCore<T> {
    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&mut self, next: SessionState) {
        let previous = self.current_state();
        if previous != next {
            debug!("Engine session state transition: {:?} -> {:?}", previous, next);
            self.state.send_replace(next);
        }
    }

    fn record(&mut self, entry: EngineLog) {
        let limit = self.config.transcript_limit;
        if limit == 0 {
            return;
        }
        while self.transcript.len() >= limit {
            self.transcript.pop_front();
        }
        self.transcript.push_back(entry);
    }

    async fn send(&mut self, command: &str, context: &str) {
        debug!("UCI_SEND [{}]: {}", context, command);
        self.record(EngineLog::Gui(command.to_string()));
        self.transport.send(command).await;
    }

    async fn set_multipv(&mut self, count: u8, context: &str) {
        let command = format!("setoption name {} value {}", MULTIPV_OPTION, count);
        self.send(&command, context).await;
    }

    /// Fail the outstanding request with `reason`, then stop the engine's search.
    ///
    /// The caller is answered before any command goes out, so nobody can
    /// observe the old request alive next to a newer one.
    async fn abandon(&mut self, reason: EngineError) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };

        if reason.is_expected() {
            debug!("Request {} ({:?}) ended: {}", pending.id, pending.kind, reason);
        } else {
            warn!(
                "Request {} ({:?}) for {} failed: {} ({:?} past deadline)",
                pending.id,
                pending.kind,
                pending.fen,
                reason,
                Instant::now().saturating_duration_since(pending.deadline)
            );
        }
        let _ = pending.reply.send(Err(reason));

        self.send("stop", "abandon").await;
        self.stale_terminals += 1;
        if pending.kind == RequestKind::TopMoves {
            self.set_multipv(1, "restore").await;
        }
        if self.current_state() == SessionState::Busy {
            self.set_state(SessionState::Ready);
        }
        true
    }

    /// Fail everything in flight and tear the transport down
    async fn fail_all(&mut self, reason: EngineError) {
        error!("Engine session failed: {}", reason);

        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(reason.clone()));
        }
        if let Some((_, handshake)) = self.handshake.take() {
            let message = match &reason {
                EngineError::EngineFailure(message) => message.clone(),
                other => other.to_string(),
            };
            let _ = handshake.send(Err(EngineError::SpawnError(message)));
        }

        self.stale_terminals = 0;
        self.generation += 1;
        self.transport.stop().await;
        self.set_state(SessionState::Crashed);
    }

    async fn dispatch(
        &mut self,
        kind: RequestKind,
        fen: &str,
        depth: u32,
        candidates: u8,
        deadline: Instant,
    ) -> EngineResult<(u64, oneshot::Receiver<EngineResult<SearchOutcome>>)> {
        match self.current_state() {
            SessionState::Ready | SessionState::Busy => {}
            state => {
                debug!("Rejecting {:?} request in state {:?}", kind, state);
                return Err(EngineError::NotInitialized);
            }
        }

        self.abandon(EngineError::Superseded).await;

        self.next_request_id += 1;
        let id = self.next_request_id;
        let (reply, receiver) = oneshot::channel();

        let accumulator = match kind {
            RequestKind::TopMoves => {
                let count = match self.identity.max_multipv {
                    Some(max) if max >= 1 && candidates > max => {
                        info!("Engine supports at most {} lines, requested {}", max, candidates);
                        max
                    }
                    _ => candidates,
                };
                self.set_multipv(count, "top_moves").await;
                Some(MultipvAccumulator::new(count))
            }
            RequestKind::SingleBestMove => None,
        };

        self.send(&format!("position fen {}", fen), "position").await;
        self.send(&format!("go depth {}", depth), "go").await;

        self.pending = Some(PendingSearch {
            id,
            kind,
            fen: fen.to_string(),
            deadline,
            reply,
            accumulator,
            last_score: None,
        });
        self.set_state(SessionState::Busy);
        Ok((id, receiver))
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Started => debug!("Engine transport started"),
            TransportEvent::Line(line) => {
                trace!("UCI_RECV: {}", line);
                self.record(EngineLog::Engine(line.clone()));
                if let Some(event) = parse_line(&line) {
                    self.on_event(event).await;
                }
            }
            TransportEvent::Crashed(message) => {
                self.fail_all(EngineError::EngineFailure(message)).await;
            }
        }
    }

    async fn on_event(&mut self, event: UciEvent) {
        match event {
            UciEvent::UciAck => {
                if self.handshake.is_some() {
                    self.send("isready", "handshake").await;
                }
            }
            UciEvent::ReadyAck => {
                if let Some((_, handshake)) = self.handshake.take() {
                    info!("Engine ready: {:?}", self.identity.name);
                    self.set_state(SessionState::Ready);
                    let _ = handshake.send(Ok(()));
                }
            }
            UciEvent::Identity { name, author } => {
                if name.is_some() {
                    self.identity.name = name;
                }
                if author.is_some() {
                    self.identity.author = author;
                }
            }
            UciEvent::OptionDeclared { max, .. } => {
                self.identity.max_multipv = max.map(|m| m.clamp(1, MAX_CANDIDATES as i64) as u8);
            }
            UciEvent::Candidate {
                rank, uci_move, score, ..
            } => {
                if self.stale_terminals > 0 {
                    return;
                }
                let Some(pending) = self.pending.as_mut() else {
                    return;
                };
                if rank == 1 && score.is_some() {
                    pending.last_score = score;
                }
                if let Some(accumulator) = pending.accumulator.as_mut() {
                    accumulator.record(rank, uci_move);
                }
            }
            UciEvent::Evaluation { rank, score, .. } => {
                if self.stale_terminals > 0 || rank != 1 {
                    return;
                }
                if let Some(pending) = self.pending.as_mut() {
                    pending.last_score = Some(score);
                }
            }
            UciEvent::Terminal { uci_move } => self.on_terminal(uci_move).await,
            UciEvent::EngineError { message } => {
                self.fail_all(EngineError::EngineFailure(message)).await;
            }
        }
    }

    async fn on_terminal(&mut self, uci_move: Option<String>) {
        if self.stale_terminals > 0 {
            self.stale_terminals -= 1;
            debug!("Discarding bestmove {:?} from an abandoned search", uci_move);
            return;
        }
        let Some(mut pending) = self.pending.take() else {
            debug!("Ignoring bestmove {:?} with no request outstanding", uci_move);
            return;
        };

        let outcome = match pending.kind {
            RequestKind::SingleBestMove => match uci_move {
                Some(token) if !is_move_token(&token) => Err(EngineError::MalformedMove(token)),
                best_move => Ok(SearchOutcome {
                    best_move,
                    candidates: Vec::new(),
                    score: pending.last_score,
                }),
            },
            RequestKind::TopMoves => {
                self.set_multipv(1, "restore").await;
                let candidates = pending
                    .accumulator
                    .as_mut()
                    .map(|accumulator| {
                        let moves = accumulator.assemble();
                        accumulator.clear();
                        moves
                    })
                    .unwrap_or_default();
                if candidates.is_empty() {
                    Err(EngineError::NoCandidates)
                } else {
                    Ok(SearchOutcome {
                        best_move: candidates.first().cloned(),
                        candidates,
                        score: pending.last_score,
                    })
                }
            }
        };

        debug!("Request {} ({:?}) finished: {:?}", pending.id, pending.kind, outcome);
        let _ = pending.reply.send(outcome);
        if self.current_state() == SessionState::Busy {
            self.set_state(SessionState::Ready);
        }
    }
}

/// Owns one engine and serialises every request made to it
///
/// Cloning is cheap and every clone talks to the same engine. At most one
/// search is outstanding; a new one fails the previous with
/// [`EngineError::Superseded`] before its own commands are sent.
pub struct EngineSession<T: UciTransport> {
    core: Arc<Mutex<SessionCore<T>>>,
    state: watch::Receiver<SessionState>,
    config: SessionConfig,
}

impl<T: UciTransport> Clone for EngineSession<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            state: self.state.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T: UciTransport> EngineSession<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Uninitialized);
        let core = SessionCore {
            transport,
            config: config.clone(),
            state: state_tx,
            generation: 0,
            next_request_id: 0,
            pending: None,
            stale_terminals: 0,
            handshake: None,
            init: None,
            identity: EngineIdentity::default(),
            transcript: VecDeque::new(),
        };
        Self {
            core: Arc::new(Mutex::new(core)),
            state: state_rx,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Initialised and usable; `Busy` counts as ready
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), SessionState::Ready | SessionState::Busy)
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub async fn identity(&self) -> EngineIdentity {
        self.core.lock().await.identity.clone()
    }

    /// Recent commands and engine output, oldest first
    pub async fn logs(&self) -> Vec<EngineLog> {
        self.core.lock().await.transcript.iter().cloned().collect()
    }

    /// Start the engine and run the `uci`/`isready` handshake.
    ///
    /// Idempotent. Concurrent callers share one handshake.
    pub async fn initialize(&self) -> EngineResult<()> {
        let init = {
            let mut core = self.core.lock().await;
            if matches!(core.current_state(), SessionState::Ready | SessionState::Busy) {
                return Ok(());
            }
            let in_flight = match &core.init {
                Some((generation, init)) if *generation == core.generation => Some(init.clone()),
                _ => None,
            };
            match in_flight {
                Some(init) => init,
                None => {
                    core.generation += 1;
                    let generation = core.generation;
                    core.set_state(SessionState::Initializing);
                    let init = Self::handshake(self.core.clone(), generation).boxed().shared();
                    core.init = Some((generation, init.clone()));
                    init
                }
            }
        };
        init.await
    }

    /// Runs on behalf of transport `generation`. Once a shutdown, crash or
    /// newer initialization has moved the session on, it only reports its own
    /// result and leaves the session alone.
    async fn handshake(core: Arc<Mutex<SessionCore<T>>>, generation: u64) -> EngineResult<()> {
        let (ready_tx, mut ready_rx) = oneshot::channel();

        let init_timeout = {
            let mut guard = core.lock().await;
            if guard.generation != generation {
                debug!("Initialization {} retired before it started", generation);
                return Err(EngineError::Cancelled);
            }

            let events = match guard.transport.start().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to start engine: {}", e);
                    guard.init = None;
                    guard.set_state(SessionState::Uninitialized);
                    return Err(e);
                }
            };
            tokio::spawn(pump(Arc::downgrade(&core), generation, events));

            guard.identity = EngineIdentity::default();
            guard.stale_terminals = 0;
            guard.handshake = Some((generation, ready_tx));
            guard.send("uci", "handshake").await;
            guard.config.init_timeout()
        };

        let timed_out = timeout(init_timeout, &mut ready_rx).await;

        let mut guard = core.lock().await;
        if matches!(guard.init, Some((owner, _)) if owner == generation) {
            guard.init = None;
        }
        let result = match timed_out {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::EngineFailure("handshake abandoned".to_string())),
            Err(_) => match ready_rx.try_recv() {
                Ok(result) => result,
                Err(_) => Err(EngineError::InitializationTimeout),
            },
        };

        if let Err(e) = &result {
            warn!("Engine initialization failed: {}", e);
            // Our slot still pending means nothing else answered: our own timeout
            if matches!(guard.handshake, Some((owner, _)) if owner == generation) {
                guard.handshake = None;
                guard.generation += 1;
                guard.transport.stop().await;
                guard.set_state(SessionState::Uninitialized);
            }
        }
        result
    }

    async fn search(
        &self,
        kind: RequestKind,
        fen: &str,
        depth: u32,
        candidates: u8,
    ) -> EngineResult<SearchOutcome> {
        if fen.trim().is_empty() {
            return Err(EngineError::InvalidArgument("empty position".to_string()));
        }
        if depth == 0 {
            return Err(EngineError::InvalidArgument("search depth must be positive".to_string()));
        }

        let search_timeout = self.config.search_timeout();
        let deadline = Instant::now() + search_timeout;
        let (id, mut receiver) = {
            let mut core = self.core.lock().await;
            core.dispatch(kind, fen, depth, candidates, deadline).await?
        };

        match timeout(search_timeout, &mut receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::EngineFailure("request dropped by session".to_string())),
            Err(_) => {
                let mut core = self.core.lock().await;
                // Only expire our own request; a newer one may already own the slot
                if core.pending.as_ref().map(|pending| pending.id) == Some(id) {
                    core.abandon(EngineError::CalculationTimeout).await;
                }
                match receiver.try_recv() {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::CalculationTimeout),
                }
            }
        }
    }

    /// Best move for `fen` searched to `depth`
    pub async fn get_best_move(&self, fen: &str, depth: u32) -> EngineResult<String> {
        let outcome = self.search(RequestKind::SingleBestMove, fen, depth, 1).await?;
        outcome.best_move.ok_or(EngineError::NoLegalMove)
    }

    /// Single-line search that also keeps the last rank 1 score
    pub async fn search_with_score(&self, fen: &str, depth: u32) -> EngineResult<SearchOutcome> {
        self.search(RequestKind::SingleBestMove, fen, depth, 1).await
    }

    /// Up to `candidate_count` moves in engine preference order
    pub async fn get_top_moves(&self, fen: &str, depth: u32, candidate_count: u8) -> EngineResult<Vec<String>> {
        if !(1..=MAX_CANDIDATES).contains(&candidate_count) {
            return Err(EngineError::InvalidArgument(format!(
                "candidate count must be between 1 and {}, got {}",
                MAX_CANDIDATES, candidate_count
            )));
        }
        let outcome = self.search(RequestKind::TopMoves, fen, depth, candidate_count).await?;
        Ok(outcome.candidates)
    }

    /// Cancel the outstanding search, if any. Safe to call when idle.
    pub async fn stop_calculation(&self) {
        let mut core = self.core.lock().await;
        if !core.abandon(EngineError::Cancelled).await
            && matches!(core.current_state(), SessionState::Ready | SessionState::Busy)
        {
            core.send("stop", "stop_calculation").await;
        }
    }

    /// Cancel everything and terminate the engine
    pub async fn shutdown(&self) {
        self.stop_calculation().await;

        let mut core = self.core.lock().await;
        if let Some((_, handshake)) = core.handshake.take() {
            let _ = handshake.send(Err(EngineError::Cancelled));
        }
        core.init = None;
        core.stale_terminals = 0;
        core.generation += 1;
        core.transport.stop().await;
        core.set_state(SessionState::Uninitialized);
        info!("Engine session shut down");
    }
}

/// Feed transport events into the session, strictly in arrival order
async fn pump<T: UciTransport>(
    core: Weak<Mutex<SessionCore<T>>>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(core) = core.upgrade() else {
            return;
        };
        let mut guard = core.lock().await;
        if guard.generation != generation {
            trace!("Dropping event from retired transport {}: {:?}", generation, event);
            return;
        }
        guard.on_transport_event(event).await;
    }

    // Channel closed without a crash report
    if let Some(core) = core.upgrade() {
        let mut guard = core.lock().await;
        if guard.generation == generation {
            guard.fail_all(EngineError::EngineFailure("engine transport closed".to_string())).await;
        }
    }
}
