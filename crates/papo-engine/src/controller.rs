//! Connection lifecycle controller.
//!
//! Each participant runs one controller task: a single select loop that owns
//! the active session and everything attached to it (signaling subscription,
//! pipeline handle, offer-retry timer, requeue delays). All transport frames,
//! timers and pipeline events are folded into that one loop, so session state
//! is mutated from exactly one place and teardown is a single step that drops
//! every per-session resource at once, so no timer can fire against a dead
//! session.
//!
//! Lifecycle: `Idle → RequestingMedia → Searching → Connecting → Connected →
//! Disconnected → (Idle | Searching)`, with auto-requeue back into searching
//! after an unplanned peer loss.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, Interval, Sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use papo_net::{BusHandle, Lobby, Match, NetError, SeekOutcome, SignalingChannel};
use papo_shared::protocol::{DataChannelFrame, SignalMessage, SignalPayload};
use papo_shared::{ChatSender, EngineConfig, Identity, Role, SessionId};
use papo_store::{Conversation, Database, StoredMessage};

use crate::chat::{dispatch_outgoing, ChatLog, ChatMessage};
use crate::error::EngineError;
use crate::media::{
    LocalMedia, MediaConstraints, MediaError, MediaPipeline, MediaProvider, PipelineEvent,
    PipelineState,
};
use crate::storage::with_db;

/// Lifecycle state reported to the UI consumer.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    RequestingMedia,
    Searching,
    Connecting,
    Connected,
    Disconnected,
}

/// Commands sent *into* the controller task.
#[derive(Debug)]
pub enum EngineCommand {
    /// Acquire the local camera/microphone.
    Start,
    /// Enter matchmaking. Requires local media.
    FindMatch,
    /// Leave the current partner and immediately search again.
    Skip,
    /// Leave and settle in idle. Never auto-searches afterwards.
    Disconnect,
    /// Send a chat line to the current partner.
    SendMessage(String),
    /// Tear everything down and stop the task.
    Shutdown,
}

/// Notifications sent *from* the controller task to its UI consumer.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StatusChanged(ConnectionStatus),
    Chat(ChatMessage),
    MatchFound {
        session_id: SessionId,
        peer: Identity,
        role: Role,
    },
    RemoteTrack {
        track_id: String,
    },
    MediaFailed(MediaError),
}

/// Handle to a running controller task.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn start(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Start).await
    }

    pub async fn find_match(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::FindMatch).await
    }

    pub async fn skip(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Skip).await
    }

    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Disconnect).await
    }

    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), EngineError> {
        self.send(EngineCommand::SendMessage(text.into())).await
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Shutdown).await
    }

    async fn send(&self, cmd: EngineCommand) -> Result<(), EngineError> {
        self.cmd_tx.send(cmd).await.map_err(|_| EngineError::Closed)
    }
}

/// Spawn the controller in a background tokio task.
///
/// Returns the command handle and the event stream. `db` enables best-effort
/// conversation history; `None` disables persistence entirely.
pub fn spawn_engine(
    identity: Identity,
    bus: BusHandle,
    provider: Arc<dyn MediaProvider>,
    db: Option<Arc<Mutex<Database>>>,
    config: EngineConfig,
) -> (EngineHandle, mpsc::Receiver<EngineEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(256);

    let engine = Engine {
        identity,
        bus,
        provider,
        db,
        config,
        cmd_rx,
        event_tx,
        status: ConnectionStatus::Idle,
        local_media: None,
        auto_requeue: false,
        chat: ChatLog::new(),
        session: None,
        seek: None,
        retry_at: None,
        running: true,
    };

    tokio::spawn(engine.run());

    (EngineHandle { cmd_tx }, event_rx)
}

type SeekFuture = Pin<Box<dyn Future<Output = Result<SeekOutcome, NetError>> + Send>>;

/// Everything owned by one active session. Dropping the struct cancels the
/// offer-retry timer, closes the event stream and releases the subscription.
struct SessionResources {
    session_id: SessionId,
    role: Role,
    peer: Identity,
    signaling: SignalingChannel,
    pipeline: Box<dyn MediaPipeline>,
    pipeline_events: mpsc::Receiver<PipelineEvent>,
    events_done: bool,
    pending_offer: Option<String>,
    offer_retry: Option<Interval>,
    answered: bool,
    conversation_id: Option<Uuid>,
}

enum Wake {
    Cmd(Option<EngineCommand>),
    Seek(Result<SeekOutcome, NetError>),
    Signal(Option<SignalMessage>),
    Pipeline(Option<PipelineEvent>),
    OfferRetry,
    RetryElapsed,
}

struct Engine {
    identity: Identity,
    bus: BusHandle,
    provider: Arc<dyn MediaProvider>,
    db: Option<Arc<Mutex<Database>>>,
    config: EngineConfig,
    cmd_rx: mpsc::Receiver<EngineCommand>,
    event_tx: mpsc::Sender<EngineEvent>,

    status: ConnectionStatus,
    local_media: Option<LocalMedia>,
    auto_requeue: bool,
    chat: ChatLog,
    session: Option<SessionResources>,
    /// Active lobby search, if any.
    seek: Option<SeekFuture>,
    /// Pending requeue-grace or search-retry delay.
    retry_at: Option<Pin<Box<Sleep>>>,
    running: bool,
}

impl Engine {
    async fn run(mut self) {
        info!(identity = %self.identity.short(), "engine starting");

        while self.running {
            let wake = self.next_wake().await;
            match wake {
                Wake::Cmd(Some(cmd)) => self.handle_command(cmd).await,
                Wake::Cmd(None) => self.shutdown().await,
                Wake::Seek(res) => self.handle_seek(res).await,
                Wake::RetryElapsed => {
                    self.retry_at = None;
                    self.handle_retry_elapsed().await;
                }
                Wake::Signal(msg) => self.handle_signal(msg).await,
                Wake::Pipeline(ev) => self.handle_pipeline(ev).await,
                Wake::OfferRetry => self.handle_offer_retry().await,
            }
        }

        info!(identity = %self.identity.short(), "engine stopped");
    }

    /// Wait for the next thing to react to.
    ///
    /// Every branch borrows a disjoint piece of the engine. Absent sources
    /// resolve to a pending future, and their guard keeps them from being
    /// polled at all.
    async fn next_wake(&mut self) -> Wake {
        use std::future::pending;

        let seek_active = self.seek.is_some();
        let retry_active = self.retry_at.is_some();

        let (mut sig, mut pipe_events, mut offer_retry) = (None, None, None);
        if let Some(s) = self.session.as_mut() {
            sig = Some(&mut s.signaling);
            if !s.events_done {
                pipe_events = Some(&mut s.pipeline_events);
            }
            offer_retry = s.offer_retry.as_mut();
        }
        let sig_active = sig.is_some();
        let pipe_active = pipe_events.is_some();
        let offer_active = offer_retry.is_some();

        let seek = self.seek.as_mut();
        let retry = self.retry_at.as_mut();
        let cmd_rx = &mut self.cmd_rx;

        tokio::select! {
            cmd = cmd_rx.recv() => Wake::Cmd(cmd),
            res = async {
                match seek { Some(f) => f.await, None => pending().await }
            }, if seek_active => Wake::Seek(res),
            () = async {
                match retry { Some(s) => s.await, None => pending().await }
            }, if retry_active => Wake::RetryElapsed,
            msg = async {
                match sig { Some(ch) => ch.recv().await, None => pending().await }
            }, if sig_active => Wake::Signal(msg),
            ev = async {
                match pipe_events { Some(rx) => rx.recv().await, None => pending().await }
            }, if pipe_active => Wake::Pipeline(ev),
            _ = async {
                match offer_retry { Some(t) => t.tick().await, None => pending().await }
            }, if offer_active => Wake::OfferRetry,
        }
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Start => self.acquire_media().await,
            EngineCommand::FindMatch => self.begin_search(false).await,
            EngineCommand::Skip => self.begin_search(true).await,
            EngineCommand::Disconnect => self.disconnect().await,
            EngineCommand::SendMessage(text) => self.send_chat(text).await,
            EngineCommand::Shutdown => self.shutdown().await,
        }
    }

    // ------------------------------------------------------------------
    // Media
    // ------------------------------------------------------------------

    async fn acquire_media(&mut self) {
        self.set_status(ConnectionStatus::RequestingMedia).await;

        match self.provider.acquire_local_media(&MediaConstraints::default()) {
            Ok(media) => {
                debug!(token = %media.token, "local media acquired");
                self.local_media = Some(media);
            }
            Err(e) => {
                warn!(error = %e, "local media acquisition failed");
                self.emit(EngineEvent::MediaFailed(e)).await;
            }
        }

        // Either way we settle back in idle; the user may retry.
        self.set_status(ConnectionStatus::Idle).await;
    }

    // ------------------------------------------------------------------
    // Matchmaking
    // ------------------------------------------------------------------

    /// Enter (or re-enter) the lobby. `leave_first` distinguishes a skip,
    /// which notifies the current partner, from a fresh search.
    async fn begin_search(&mut self, leave_first: bool) {
        if self.local_media.is_none() {
            self.emit(EngineEvent::MediaFailed(MediaError::Other(
                "local media not acquired".to_string(),
            )))
            .await;
            return;
        }

        if leave_first {
            self.send_leave().await;
        }
        self.teardown_session().await;
        self.retry_at = None;
        self.chat.clear();
        self.auto_requeue = true;
        self.push_system("Procurando alguém...").await;

        self.start_seek();
        self.set_status(ConnectionStatus::Searching).await;
    }

    fn start_seek(&mut self) {
        let bus = self.bus.clone();
        let identity = self.identity.clone();
        let config = self.config.clone();

        self.seek = Some(Box::pin(async move {
            let lobby = Lobby::new(bus, identity, &config);
            lobby.seek().await
        }));
    }

    async fn handle_seek(&mut self, res: Result<SeekOutcome, NetError>) {
        self.seek = None;

        match res {
            Ok(SeekOutcome::Matched(m)) => self.open_session(m).await,
            Ok(SeekOutcome::TimedOut) => {
                self.push_system("Ninguém encontrado. Tentando de novo...").await;
                if self.auto_requeue {
                    self.retry_at = Some(Box::pin(sleep(self.config.search_retry_delay)));
                } else {
                    self.set_status(ConnectionStatus::Idle).await;
                }
            }
            Err(e) => {
                error!(error = %e, "matchmaking failed");
                self.set_status(ConnectionStatus::Disconnected).await;
            }
        }
    }

    /// The deferred requeue (after peer loss) or search retry (after a
    /// timeout) came due. A user who disconnected during the wait must not
    /// be resurrected into search, hence the flag re-check.
    async fn handle_retry_elapsed(&mut self) {
        if self.auto_requeue && self.local_media.is_some() && self.session.is_none() {
            if self.seek.is_none() {
                self.start_seek();
            }
            self.set_status(ConnectionStatus::Searching).await;
        }
    }

    // ------------------------------------------------------------------
    // Session setup and signaling
    // ------------------------------------------------------------------

    async fn open_session(&mut self, m: Match) {
        let Some(local) = self.local_media.clone() else {
            self.set_status(ConnectionStatus::Disconnected).await;
            return;
        };

        let signaling =
            match SignalingChannel::open(&self.bus, m.session_id, self.identity.clone()).await {
                Ok(ch) => ch,
                Err(e) => {
                    error!(error = %e, "failed to open signaling channel");
                    self.set_status(ConnectionStatus::Disconnected).await;
                    return;
                }
            };

        let (pipeline, pipeline_events) = match self.provider.create_pipeline(m.role, &local) {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "failed to create pipeline");
                self.emit(EngineEvent::MediaFailed(e)).await;
                self.set_status(ConnectionStatus::Disconnected).await;
                return;
            }
        };

        info!(
            session = %m.session_id,
            role = ?m.role,
            peer = %m.peer.short(),
            "session opening"
        );

        let mut session = SessionResources {
            session_id: m.session_id,
            role: m.role,
            peer: m.peer.clone(),
            signaling,
            pipeline,
            pipeline_events,
            events_done: false,
            pending_offer: None,
            offer_retry: None,
            answered: false,
            conversation_id: None,
        };

        self.emit(EngineEvent::MatchFound {
            session_id: m.session_id,
            peer: m.peer,
            role: m.role,
        })
        .await;

        match m.role {
            Role::Initiator => match session.pipeline.create_offer() {
                Ok(sdp) => {
                    session.pending_offer = Some(sdp.clone());
                    if let Err(e) = session.signaling.send(SignalPayload::Offer { sdp }).await {
                        warn!(error = %e, "initial offer send failed");
                    }
                    // The responder's subscription may open after our first
                    // send; keep re-sending until it acknowledges or answers.
                    let period = self.config.offer_retry_interval;
                    session.offer_retry = Some(interval_at(Instant::now() + period, period));
                }
                Err(e) => {
                    error!(error = %e, "offer creation failed");
                    self.emit(EngineEvent::MediaFailed(e)).await;
                    self.set_status(ConnectionStatus::Disconnected).await;
                    return;
                }
            },
            Role::Responder => {
                if let Err(e) = session.signaling.send(SignalPayload::Ready).await {
                    warn!(error = %e, "ready send failed");
                }
            }
        }

        self.session = Some(session);
        self.push_system("Conectando...").await;
        self.set_status(ConnectionStatus::Connecting).await;
    }

    async fn handle_signal(&mut self, msg: Option<SignalMessage>) {
        let Some(msg) = msg else {
            // Transport went away under the session.
            warn!("signaling stream ended");
            self.push_system("O estranho se desconectou.").await;
            self.peer_lost().await;
            return;
        };

        match msg.payload {
            SignalPayload::Leave => {
                self.push_system("O estranho se desconectou.").await;
                self.peer_lost().await;
            }

            SignalPayload::Chat { text } => self.receive_chat(text).await,

            payload => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                match payload {
                    SignalPayload::Ready => {
                        if session.role != Role::Initiator {
                            return;
                        }
                        // Responder is listening now: deliver the pending
                        // offer directly and stop the blind retries.
                        if let Some(sdp) = session.pending_offer.clone() {
                            debug!(session = %session.session_id, "responder ready, sending offer");
                            session.offer_retry = None;
                            if let Err(e) =
                                session.signaling.send(SignalPayload::Offer { sdp }).await
                            {
                                warn!(error = %e, "offer send on ready failed");
                            }
                        }
                    }

                    SignalPayload::Offer { sdp } => {
                        if session.role != Role::Responder {
                            return;
                        }
                        if session.answered {
                            debug!(session = %session.session_id, "duplicate offer ignored");
                            return;
                        }
                        match session.pipeline.create_answer(&sdp) {
                            Ok(answer) => {
                                session.answered = true;
                                if let Err(e) = session
                                    .signaling
                                    .send(SignalPayload::Answer { sdp: answer })
                                    .await
                                {
                                    warn!(error = %e, "answer send failed");
                                }
                            }
                            Err(e) => error!(error = %e, "answer creation failed"),
                        }
                    }

                    SignalPayload::Answer { sdp } => {
                        if session.role != Role::Initiator || session.answered {
                            return;
                        }
                        session.answered = true;
                        session.offer_retry = None;
                        session.pending_offer = None;
                        if let Err(e) = session.pipeline.set_remote_answer(&sdp) {
                            error!(error = %e, "applying remote answer failed");
                        }
                    }

                    SignalPayload::Candidate { candidate } => {
                        // Unordered and possibly duplicated; the pipeline is
                        // required to tolerate both.
                        if let Err(e) = session.pipeline.add_remote_candidate(&candidate) {
                            warn!(error = %e, "remote candidate rejected");
                        }
                    }

                    // Leave and chat were handled by the outer match.
                    SignalPayload::Leave | SignalPayload::Chat { .. } => {}
                }
            }
        }
    }

    async fn handle_offer_retry(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.pending_offer.clone() {
            Some(sdp) => {
                debug!(session = %session.session_id, "retrying offer");
                if let Err(e) = session.signaling.send(SignalPayload::Offer { sdp }).await {
                    warn!(error = %e, "offer retry failed");
                }
            }
            None => session.offer_retry = None,
        }
    }

    // ------------------------------------------------------------------
    // Pipeline events
    // ------------------------------------------------------------------

    async fn handle_pipeline(&mut self, ev: Option<PipelineEvent>) {
        let Some(ev) = ev else {
            debug!("pipeline event stream ended");
            if let Some(s) = self.session.as_mut() {
                s.events_done = true;
            }
            return;
        };

        match ev {
            PipelineEvent::StateChanged(state) => self.pipeline_state_changed(state).await,

            PipelineEvent::LocalCandidate(candidate) => {
                if let Some(s) = &self.session {
                    if let Err(e) = s.signaling.send(SignalPayload::Candidate { candidate }).await {
                        warn!(error = %e, "candidate relay failed");
                    }
                }
            }

            PipelineEvent::RemoteTrack { track_id } => {
                self.emit(EngineEvent::RemoteTrack { track_id }).await;
            }

            PipelineEvent::DataChannelOpen => debug!("data channel open"),

            PipelineEvent::DataChannelText(frame) => match DataChannelFrame::from_json(&frame) {
                Ok(DataChannelFrame::Chat { text }) => self.receive_chat(text).await,
                Err(e) => warn!(error = %e, "malformed data channel frame"),
            },
        }
    }

    async fn pipeline_state_changed(&mut self, state: PipelineState) {
        debug!(state = ?state, "pipeline state change");

        match state {
            PipelineState::Connected => {
                if self.status != ConnectionStatus::Connected {
                    self.set_status(ConnectionStatus::Connected).await;
                    self.push_system("Conectado! Diga olá 👋").await;
                    self.open_conversation();
                }
            }

            PipelineState::Disconnected | PipelineState::Failed | PipelineState::Closed => {
                // Only a drop out of an established session counts as peer
                // loss; failures while connecting resolve via signaling.
                if self.status == ConnectionStatus::Connected {
                    self.push_system("O estranho se desconectou.").await;
                    self.peer_lost().await;
                }
            }

            PipelineState::New | PipelineState::Connecting => {}
        }
    }

    // ------------------------------------------------------------------
    // Teardown and recovery
    // ------------------------------------------------------------------

    async fn disconnect(&mut self) {
        // Order matters: clear the flag before anything else so no timer
        // fired during teardown can re-enter search.
        self.auto_requeue = false;
        self.retry_at = None;
        self.seek = None;

        if self.session.is_some() {
            self.send_leave().await;
        }
        self.teardown_session().await;
        self.chat.clear();
        self.set_status(ConnectionStatus::Idle).await;
        self.push_system("Você se desconectou.").await;
    }

    /// Peer left (signaled) or the established connection dropped.
    async fn peer_lost(&mut self) {
        self.teardown_session().await;
        self.set_status(ConnectionStatus::Disconnected).await;

        if self.auto_requeue && self.local_media.is_some() {
            self.push_system("Procurando outra pessoa...").await;
            self.retry_at = Some(Box::pin(sleep(self.config.requeue_grace)));
        }
    }

    async fn send_leave(&mut self) {
        if let Some(s) = &self.session {
            if let Err(e) = s.signaling.send(SignalPayload::Leave).await {
                debug!(error = %e, "leave send failed");
            }
        }
    }

    /// Release every per-session resource in one step.
    async fn teardown_session(&mut self) {
        if let Some(mut s) = self.session.take() {
            if let Some(conv_id) = s.conversation_id.take() {
                if let Some(db) = &self.db {
                    with_db(db, "conversation end", |d| {
                        d.end_conversation(conv_id, Utc::now())
                    });
                }
            }
            s.signaling.close();
            s.pipeline.close();
            // Dropping `s` cancels the offer-retry timer and the pipeline
            // event stream with it.
            info!(session = %s.session_id, "session torn down");
        }
    }

    async fn shutdown(&mut self) {
        self.auto_requeue = false;
        self.retry_at = None;
        self.seek = None;
        if self.session.is_some() {
            self.send_leave().await;
        }
        self.teardown_session().await;
        self.running = false;
    }

    // ------------------------------------------------------------------
    // Chat
    // ------------------------------------------------------------------

    async fn send_chat(&mut self, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }

        // Optimistic local append before dispatch.
        let msg = self.chat.push(text.clone(), ChatSender::Me);
        self.persist_chat(&msg);
        self.emit(EngineEvent::Chat(msg)).await;

        if let Some(s) = self.session.as_mut() {
            match dispatch_outgoing(s.pipeline.as_mut(), &s.signaling, &text).await {
                Ok(path) => debug!(path = ?path, "chat dispatched"),
                Err(e) => warn!(error = %e, "chat dispatch failed"),
            }
        }
    }

    async fn receive_chat(&mut self, text: String) {
        let msg = self.chat.push(text, ChatSender::Peer);
        self.persist_chat(&msg);
        self.emit(EngineEvent::Chat(msg)).await;
    }

    fn open_conversation(&mut self) {
        let Some(db) = self.db.clone() else { return };
        let Some(session) = self.session.as_mut() else { return };

        let conversation =
            Conversation::open(session.session_id, self.identity.clone(), "Desconhecido");
        if with_db(&db, "conversation create", |d| d.create_conversation(&conversation)).is_some()
        {
            session.conversation_id = Some(conversation.id);
        }
    }

    fn persist_chat(&self, msg: &ChatMessage) {
        let Some(db) = &self.db else { return };
        let Some(conv_id) = self.session.as_ref().and_then(|s| s.conversation_id) else {
            return;
        };
        with_db(db, "message append", |d| {
            d.append_conversation_message(&StoredMessage::new(conv_id, msg.sender, msg.text.clone()))
        });
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    async fn push_system(&mut self, text: &str) {
        let msg = self.chat.push(text, ChatSender::System);
        self.emit(EngineEvent::Chat(msg)).await;
    }

    async fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            info!(from = ?self.status, to = ?status, "status change");
            self.status = status;
            self.emit(EngineEvent::StatusChanged(status)).await;
        }
    }

    async fn emit(&mut self, event: EngineEvent) {
        // A departed consumer only loses notifications, never blocks us.
        if self.event_tx.send(event).await.is_err() {
            debug!("event consumer gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::timeout;

    use papo_net::spawn_memory_bus;
    use papo_shared::constants::LOBBY_TOPIC;
    use papo_shared::protocol::LobbyMessage;

    use crate::testing::{FakeControl, FakeMedia};

    const WAIT: Duration = Duration::from_secs(2);

    fn spawn(
        bus: &BusHandle,
        media: Arc<dyn MediaProvider>,
        name: &str,
    ) -> (EngineHandle, mpsc::Receiver<EngineEvent>) {
        spawn_engine(
            Identity::new(name),
            bus.clone(),
            media,
            None,
            EngineConfig::fast(),
        )
    }

    async fn wait_for_status(rx: &mut mpsc::Receiver<EngineEvent>, want: ConnectionStatus) {
        loop {
            let ev = timeout(WAIT, rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {want:?}"))
                .expect("event stream ended");
            if let EngineEvent::StatusChanged(status) = ev {
                if status == want {
                    return;
                }
            }
        }
    }

    async fn wait_for_chat(rx: &mut mpsc::Receiver<EngineEvent>, sender: ChatSender, text: &str) {
        loop {
            let ev = timeout(WAIT, rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for chat {text:?}"))
                .expect("event stream ended");
            if let EngineEvent::Chat(msg) = ev {
                if msg.sender == sender && msg.text == text {
                    return;
                }
            }
        }
    }

    /// Bring two engines over one shared fake provider all the way to
    /// `Connected`.
    async fn connected_pair() -> (
        BusHandle,
        FakeControl,
        (EngineHandle, mpsc::Receiver<EngineEvent>),
        (EngineHandle, mpsc::Receiver<EngineEvent>),
    ) {
        let bus = spawn_memory_bus();
        let (media, ctl) = FakeMedia::new();
        let (a, mut rx_a) = spawn(&bus, media.clone(), "anon-aa");
        let (b, mut rx_b) = spawn(&bus, media, "anon-bb");

        a.start().await.unwrap();
        b.start().await.unwrap();
        a.find_match().await.unwrap();
        b.find_match().await.unwrap();

        wait_for_status(&mut rx_a, ConnectionStatus::Connecting).await;
        wait_for_status(&mut rx_b, ConnectionStatus::Connecting).await;

        ctl.drive(
            Role::Initiator,
            PipelineEvent::StateChanged(PipelineState::Connected),
        )
        .await;
        ctl.drive(
            Role::Responder,
            PipelineEvent::StateChanged(PipelineState::Connected),
        )
        .await;

        wait_for_status(&mut rx_a, ConnectionStatus::Connected).await;
        wait_for_status(&mut rx_b, ConnectionStatus::Connected).await;

        (bus, ctl, (a, rx_a), (b, rx_b))
    }

    /// Hand-driven lobby peer: announces once, waits for the proposal naming
    /// it responder and opens the session's signaling channel.
    async fn harness_responder(bus: &BusHandle, me: &Identity) -> SignalingChannel {
        let mut lobby = bus.subscribe(LOBBY_TOPIC).await.unwrap();
        let seeking = LobbyMessage::Seeking {
            identity: me.clone(),
            sent_at: Utc::now(),
        };
        lobby.publish(seeking.to_bytes().unwrap()).await.unwrap();

        let session_id = loop {
            let frame = timeout(WAIT, lobby.recv())
                .await
                .expect("no proposal arrived")
                .expect("lobby stream ended");
            if let Ok(LobbyMessage::MatchProposal {
                session_id,
                responder,
                ..
            }) = LobbyMessage::from_bytes(&frame.data)
            {
                assert_eq!(&responder, me);
                break session_id;
            }
        };

        SignalingChannel::open(bus, session_id, me.clone()).await.unwrap()
    }

    #[tokio::test]
    async fn start_acquires_media_then_settles_idle() {
        let bus = spawn_memory_bus();
        let (media, _ctl) = FakeMedia::new();
        let (engine, mut rx) = spawn(&bus, media, "anon-aa");

        engine.start().await.unwrap();
        wait_for_status(&mut rx, ConnectionStatus::RequestingMedia).await;
        wait_for_status(&mut rx, ConnectionStatus::Idle).await;
    }

    #[tokio::test]
    async fn media_denial_is_reported_but_not_fatal() {
        let bus = spawn_memory_bus();
        let media = FakeMedia::denying(MediaError::PermissionDenied);
        let (engine, mut rx) = spawn(&bus, media, "anon-aa");

        engine.start().await.unwrap();
        loop {
            let ev = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            if matches!(ev, EngineEvent::MediaFailed(MediaError::PermissionDenied)) {
                break;
            }
        }
        wait_for_status(&mut rx, ConnectionStatus::Idle).await;

        // The task is still alive and answering.
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn find_match_without_media_is_rejected() {
        let bus = spawn_memory_bus();
        let (media, _ctl) = FakeMedia::new();
        let (engine, mut rx) = spawn(&bus, media, "anon-aa");

        engine.find_match().await.unwrap();

        let ev = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(ev, EngineEvent::MediaFailed(MediaError::Other(_))));

        let stray = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(stray.is_err(), "search started without local media");
    }

    #[tokio::test]
    async fn two_engines_meet_and_connect() {
        let (_bus, ctl, (a, _rx_a), (b, _rx_b)) = connected_pair().await;

        // The handshake settled on exactly one answer, created once and
        // applied once, no matter how many offer retries went out.
        for _ in 0..100 {
            if ctl.remote_answers_applied() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ctl.answers_created(), 1);
        assert_eq!(ctl.remote_answers_applied(), 1);

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn chat_falls_back_to_signaling_until_direct_path_opens() {
        let (_bus, ctl, (a, mut rx_a), (b, mut rx_b)) = connected_pair().await;

        // No data channel yet: the line travels via signaling.
        a.send_message("oi").await.unwrap();
        wait_for_chat(&mut rx_a, ChatSender::Me, "oi").await;
        wait_for_chat(&mut rx_b, ChatSender::Peer, "oi").await;

        // Direct path opens on the initiator side.
        ctl.set_writable(Role::Initiator, true);
        a.send_message("agora direto").await.unwrap();
        wait_for_chat(&mut rx_b, ChatSender::Peer, "agora direto").await;

        // The responder still answers over its own fallback.
        b.send_message("recebido").await.unwrap();
        wait_for_chat(&mut rx_a, ChatSender::Peer, "recebido").await;

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn peer_disconnect_triggers_auto_requeue() {
        let (_bus, _ctl, (a, mut rx_a), (b, mut rx_b)) = connected_pair().await;

        b.disconnect().await.unwrap();
        wait_for_status(&mut rx_b, ConnectionStatus::Idle).await;

        // The survivor notices the leave and re-enters search on its own.
        wait_for_status(&mut rx_a, ConnectionStatus::Disconnected).await;
        wait_for_status(&mut rx_a, ConnectionStatus::Searching).await;

        a.disconnect().await.unwrap();
        wait_for_status(&mut rx_a, ConnectionStatus::Idle).await;
    }

    #[tokio::test]
    async fn skip_notifies_partner_and_searches_again() {
        let (_bus, _ctl, (a, mut rx_a), (b, mut rx_b)) = connected_pair().await;

        a.skip().await.unwrap();
        wait_for_status(&mut rx_a, ConnectionStatus::Searching).await;

        // The skipped side is told, grieves briefly, then requeues too.
        wait_for_status(&mut rx_b, ConnectionStatus::Disconnected).await;
        wait_for_status(&mut rx_b, ConnectionStatus::Searching).await;

        a.disconnect().await.unwrap();
        b.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_during_search_is_never_resurrected() {
        let bus = spawn_memory_bus();
        let (media, _ctl) = FakeMedia::new();
        let (engine, mut rx) = spawn(&bus, media, "anon-aa");

        engine.start().await.unwrap();
        engine.find_match().await.unwrap();
        wait_for_status(&mut rx, ConnectionStatus::Searching).await;

        engine.disconnect().await.unwrap();
        wait_for_status(&mut rx, ConnectionStatus::Idle).await;

        // Outlive the search window and the retry delay.
        tokio::time::sleep(Duration::from_millis(600)).await;
        while let Ok(ev) = rx.try_recv() {
            assert!(
                !matches!(ev, EngineEvent::StatusChanged(ConnectionStatus::Searching)),
                "search restarted after an explicit disconnect"
            );
        }
    }

    #[tokio::test]
    async fn lone_search_times_out_and_retries() {
        let bus = spawn_memory_bus();
        let (media, _ctl) = FakeMedia::new();
        let (engine, mut rx) = spawn(&bus, media, "anon-aa");

        engine.start().await.unwrap();
        engine.find_match().await.unwrap();
        wait_for_status(&mut rx, ConnectionStatus::Searching).await;

        // Two consecutive empty windows prove the retry loop keeps going.
        wait_for_chat(&mut rx, ChatSender::System, "Ninguém encontrado. Tentando de novo...")
            .await;
        wait_for_chat(&mut rx, ChatSender::System, "Ninguém encontrado. Tentando de novo...")
            .await;

        engine.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn offers_repeat_until_the_responder_answers_exactly_once() {
        let bus = spawn_memory_bus();
        let (media, ctl) = FakeMedia::new();
        let (engine, mut rx) = spawn(&bus, media, "anon-aa");

        engine.start().await.unwrap();
        engine.find_match().await.unwrap();
        wait_for_status(&mut rx, ConnectionStatus::Searching).await;

        let me = Identity::new("anon-zz");
        let mut signaling = harness_responder(&bus, &me).await;

        // Show up late: several retry periods pass before we are ready.
        tokio::time::sleep(Duration::from_millis(150)).await;
        signaling.send(SignalPayload::Ready).await.unwrap();

        loop {
            let msg = timeout(WAIT, signaling.recv()).await.unwrap().unwrap();
            if matches!(msg.payload, SignalPayload::Offer { .. }) {
                break;
            }
        }
        signaling
            .send(SignalPayload::Answer { sdp: "answer-sdp".into() })
            .await
            .unwrap();
        signaling
            .send(SignalPayload::Answer { sdp: "answer-sdp".into() })
            .await
            .unwrap();

        // The duplicate answer is ignored.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ctl.remote_answers_applied(), 1);

        engine.disconnect().await.unwrap();
        wait_for_status(&mut rx, ConnectionStatus::Idle).await;
    }

    #[tokio::test]
    async fn teardown_stops_the_offer_retries() {
        let bus = spawn_memory_bus();
        let (media, _ctl) = FakeMedia::new();
        let (engine, mut rx) = spawn(&bus, media, "anon-aa");

        engine.start().await.unwrap();
        engine.find_match().await.unwrap();
        wait_for_status(&mut rx, ConnectionStatus::Searching).await;

        let me = Identity::new("anon-zz");
        let mut signaling = harness_responder(&bus, &me).await;

        // Offers are flowing.
        let msg = timeout(WAIT, signaling.recv()).await.unwrap().unwrap();
        assert!(matches!(msg.payload, SignalPayload::Offer { .. }));

        engine.disconnect().await.unwrap();

        // Drain the in-flight frames up to the leave, then expect silence.
        loop {
            let msg = timeout(WAIT, signaling.recv()).await.unwrap().unwrap();
            if msg.payload == SignalPayload::Leave {
                break;
            }
        }
        let after = timeout(Duration::from_millis(150), signaling.recv()).await;
        assert!(after.is_err(), "signals kept flowing after teardown");
    }
}
