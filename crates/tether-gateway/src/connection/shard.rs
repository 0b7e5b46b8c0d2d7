//! Shard connection
//!
//! One task per shard owns the socket reader and every piece of connection
//! state (sequence, session, status), so all of it has a single writer. Outbound
//! frames go through the shard's traffic buckets to a writer task that owns
//! the socket sink.

use super::heartbeat::HeartbeatDriver;
use super::session::{connect_url, Session};
use super::status::{ShardStatus, TrafficClass};
use crate::error::{GatewayError, GatewayResult};
use crate::events::{DispatchEvent, ShardEvent, ShardEventKind};
use crate::protocol::{
    CloseCode, GatewayMessage, IdentifyPayload, OpCode, PresenceUpdatePayload,
    RequestGuildMembersPayload, VoiceStateUpdatePayload,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tether_common::GatewayConfig;
use tether_core::{Bucket, Job, Snowflake};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Close code sent when dropping a socket we intend to resume
const RESUMABLE_CLOSE: u16 = 4000;

struct Inner {
    id: u32,
    count: u32,
    token: String,
    /// Gateway host from the bootstrap call
    url: String,
    config: GatewayConfig,
    general: Bucket,
    presence: Bucket,
    /// Shared across shards to space out identify frames
    identify_queue: Option<Bucket>,
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    status: watch::Sender<ShardStatus>,
    sequence: watch::Sender<Option<u64>>,
    session: Mutex<Session>,
    shutdown: watch::Sender<bool>,
}

/// Handle to one gateway shard
///
/// Cloning is cheap; all clones refer to the same connection.
#[derive(Clone)]
pub struct Shard {
    inner: Arc<Inner>,
}

impl Shard {
    /// Create a shard that identifies as `[id, count]` against `url`
    ///
    /// Must be called from within a Tokio runtime. Nothing is dialed until
    /// [`Shard::start`].
    pub fn new(
        id: u32,
        count: u32,
        token: impl Into<String>,
        url: impl Into<String>,
        config: GatewayConfig,
    ) -> Self {
        Self::build(id, count, token.into(), url.into(), config, None)
    }

    pub(crate) fn build(
        id: u32,
        count: u32,
        token: String,
        url: String,
        config: GatewayConfig,
        identify_queue: Option<Bucket>,
    ) -> Self {
        let bucket = |class: TrafficClass| {
            Bucket::fixed(format!("{}.{id}", class.name()), class.limit(), class.interval())
        };

        Self {
            inner: Arc::new(Inner {
                id,
                count,
                token,
                url,
                config,
                general: bucket(TrafficClass::General),
                presence: bucket(TrafficClass::Presence),
                identify_queue,
                writer: Mutex::new(None),
                status: watch::channel(ShardStatus::Disconnected).0,
                sequence: watch::channel(None).0,
                session: Mutex::new(Session::default()),
                shutdown: watch::channel(false).0,
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn count(&self) -> u32 {
        self.inner.count
    }

    pub fn status(&self) -> ShardStatus {
        *self.inner.status.borrow()
    }

    /// Subscribe to status transitions
    pub fn watch_status(&self) -> watch::Receiver<ShardStatus> {
        self.inner.status.subscribe()
    }

    /// Get the last sequence received on the current session
    pub fn sequence(&self) -> Option<u64> {
        *self.inner.sequence.borrow()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.session.lock().id().map(str::to_string)
    }

    /// Spawn the connection loop, emitting events on `events`
    ///
    /// The loop runs until [`Shard::stop`] or a fatal close, and always ends
    /// with a `Stopped` or `Fatal` event.
    pub fn start(&self, events: mpsc::Sender<ShardEvent>) -> JoinHandle<()> {
        self.inner.shutdown.send_replace(false);
        let runner = Runner {
            shard: self.clone(),
            events,
        };
        tokio::spawn(runner.run())
    }

    /// Close the socket and end the connection loop
    pub fn stop(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// Send a frame through the bucket of `class`
    ///
    /// Resolves once the frame is handed to the socket; fails with
    /// `NotConnected` if no socket is open when the bucket admits it.
    pub async fn send(&self, frame: &GatewayMessage, class: TrafficClass) -> GatewayResult<()> {
        let text = frame
            .to_json()
            .map_err(|e| GatewayError::Encode(e.to_string()))?;
        let inner = self.inner.clone();

        let bucket = match class {
            TrafficClass::General => &self.inner.general,
            TrafficClass::Presence => &self.inner.presence,
        };

        bucket
            .admit(move || async move {
                let writer = inner.writer.lock().clone();
                match writer {
                    Some(tx) => tx
                        .send(Message::Text(text.into()))
                        .map_err(|_| GatewayError::NotConnected),
                    None => Err(GatewayError::NotConnected),
                }
            })
            .await
            .map_err(|_| GatewayError::Stopped)?
    }

    pub async fn update_presence(&self, presence: &PresenceUpdatePayload) -> GatewayResult<()> {
        self.send(&GatewayMessage::presence_update(presence), TrafficClass::Presence)
            .await
    }

    pub async fn join_voice_channel(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
    ) -> GatewayResult<()> {
        let payload = VoiceStateUpdatePayload::join(guild_id, channel_id);
        self.send(&GatewayMessage::voice_state_update(&payload), TrafficClass::General)
            .await
    }

    pub async fn leave_voice_channel(&self, guild_id: Snowflake) -> GatewayResult<()> {
        let payload = VoiceStateUpdatePayload::leave(guild_id);
        self.send(&GatewayMessage::voice_state_update(&payload), TrafficClass::General)
            .await
    }

    /// Ask for every member of a guild; they arrive as dispatch events
    pub async fn request_guild_members(&self, guild_id: Snowflake) -> GatewayResult<()> {
        let payload = RequestGuildMembersPayload::all(guild_id);
        self.send(
            &GatewayMessage::request_guild_members(&payload),
            TrafficClass::General,
        )
        .await
    }

    fn identify_payload(&self) -> IdentifyPayload {
        IdentifyPayload::new(&self.inner.token, self.inner.id, self.inner.count)
            .with_compress(self.inner.config.compress)
            .with_large_threshold(self.inner.config.large_threshold)
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("id", &self.inner.id)
            .field("count", &self.inner.count)
            .field("status", &self.status())
            .field("sequence", &self.sequence())
            .finish()
    }
}

/// How a connection attempt ended
#[derive(Debug)]
enum Outcome {
    Stopped,
    Reconnect(String),
    Fatal(GatewayError),
}

/// What a close code asks of the shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseDisposition {
    Fatal(CloseCode),
    Reconnect { keep_session: bool },
}

fn close_disposition(code: Option<u16>) -> CloseDisposition {
    match code.and_then(CloseCode::from_u16) {
        Some(code) if code.is_fatal() => CloseDisposition::Fatal(code),
        Some(code) => CloseDisposition::Reconnect {
            keep_session: !code.invalidates_session(),
        },
        None => CloseDisposition::Reconnect { keep_session: true },
    }
}

/// Record `seq` unless it would move the sequence backwards
fn advance_sequence(current: &mut Option<u64>, seq: u64) -> bool {
    if current.is_some_and(|last| seq <= last) {
        return false;
    }
    *current = Some(seq);
    true
}

/// Resolve once a stop has been requested
///
/// A dropped sender counts as a stop.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Build a job that writes one text frame to a specific socket
fn frame_job(text: String, tx: mpsc::UnboundedSender<Message>) -> Job {
    Box::new(move || {
        Box::pin(async move {
            // The socket may have closed while the frame was queued
            let _ = tx.send(Message::Text(text.into()));
            None
        })
    })
}

/// Per-socket state, dropped when the socket is
struct Connection {
    tx: mpsc::UnboundedSender<Message>,
    beat_tx: mpsc::UnboundedSender<()>,
    heartbeat: Option<HeartbeatDriver>,
    awaiting_ack: bool,
}

impl Connection {
    fn send_now(&self, frame: &GatewayMessage) {
        if let Ok(text) = frame.to_json() {
            let _ = self.tx.send(Message::Text(text.into()));
        }
    }

    fn close(&self, code: Option<u16>) {
        let frame = code.map(|code| CloseFrame {
            code: WsCloseCode::from(code),
            reason: "".into(),
        });
        let _ = self.tx.send(Message::Close(frame));
    }
}

struct Runner {
    shard: Shard,
    events: mpsc::Sender<ShardEvent>,
}

impl Runner {
    fn inner(&self) -> &Inner {
        &self.shard.inner
    }

    async fn run(self) {
        let mut shutdown = self.inner().shutdown.subscribe();
        let delay = self.inner().config.reconnect_delay();

        let terminal = loop {
            if *shutdown.borrow_and_update() {
                break ShardEventKind::Stopped;
            }

            match self.connect(&mut shutdown).await {
                Outcome::Stopped => break ShardEventKind::Stopped,
                Outcome::Fatal(error) => {
                    tracing::error!(
                        shard = self.inner().id,
                        error = %error,
                        "Gateway closed with a fatal code, not reconnecting"
                    );
                    break ShardEventKind::Fatal(error);
                }
                Outcome::Reconnect(reason) => {
                    self.set_status(ShardStatus::Reconnecting);
                    tracing::warn!(
                        shard = self.inner().id,
                        reason = %reason,
                        delay_ms = delay.as_millis(),
                        "Connection lost, reconnecting"
                    );

                    tokio::select! {
                        () = sleep(delay) => {}
                        () = stop_requested(&mut shutdown) => {}
                    }
                }
            }
        };

        self.clear_session();
        self.set_status(ShardStatus::Disconnected);
        tracing::info!(shard = self.inner().id, "Shard stopped");
        self.emit(terminal).await;
    }

    /// Dial once and drive the socket until it ends
    async fn connect(&self, shutdown: &mut watch::Receiver<bool>) -> Outcome {
        let inner = self.inner();
        self.set_status(ShardStatus::Connecting);

        let url = {
            let session = inner.session.lock();
            let sequence = *inner.sequence.borrow();
            connect_url(session.dial_url(&inner.url, sequence))
        };
        tracing::info!(shard = inner.id, url = %url, "Connecting to gateway");

        let socket = tokio::select! {
            result = connect_async(url.as_str()) => match result {
                Ok((socket, _)) => socket,
                Err(e) => return Outcome::Reconnect(GatewayError::Connect(e.to_string()).to_string()),
            },
            () = stop_requested(shutdown) => return Outcome::Stopped,
        };

        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        *inner.writer.lock() = Some(tx.clone());
        self.set_status(ShardStatus::AwaitingHello);

        let (beat_tx, mut beat_rx) = mpsc::unbounded_channel();
        let mut conn = Connection {
            tx,
            beat_tx,
            heartbeat: None,
            awaiting_ack: false,
        };

        let outcome = loop {
            tokio::select! {
                () = stop_requested(shutdown) => {
                    conn.close(None);
                    break Outcome::Stopped;
                }
                Some(()) = beat_rx.recv() => {
                    if conn.awaiting_ack {
                        conn.close(Some(RESUMABLE_CLOSE));
                        break Outcome::Reconnect("heartbeat was not acknowledged".to_string());
                    }
                    conn.awaiting_ack = true;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(outcome) = self.handle_text(&text, &mut conn).await {
                            conn.close(Some(RESUMABLE_CLOSE));
                            break outcome;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break self.on_close(frame.map(|frame| u16::from(frame.code)));
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::warn!(shard = inner.id, "Ignoring binary frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Outcome::Reconnect(format!("socket error: {e}")),
                    None => break self.on_close(None),
                }
            }
        };

        inner.writer.lock().take();
        if let Some(heartbeat) = conn.heartbeat.take() {
            heartbeat.stop();
        }
        outcome
    }

    /// Handle one text frame; `Some` ends the connection
    async fn handle_text(&self, text: &str, conn: &mut Connection) -> Option<Outcome> {
        let inner = self.inner();
        let message = match GatewayMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                let error = GatewayError::Decode(e.to_string());
                tracing::warn!(shard = inner.id, error = %error, "Dropping frame");
                return None;
            }
        };

        if let Some(seq) = message.s {
            inner
                .sequence
                .send_if_modified(|current| advance_sequence(current, seq));
        }

        if message.t.is_some() {
            self.on_dispatch(message).await;
            return None;
        }

        match message.op {
            OpCode::Hello => return self.on_hello(&message, conn),
            OpCode::HeartbeatAck => {
                conn.awaiting_ack = false;
                tracing::trace!(shard = inner.id, "Heartbeat acknowledged");
            }
            OpCode::Heartbeat => {
                let seq = *inner.sequence.borrow();
                conn.send_now(&GatewayMessage::heartbeat(seq));
                tracing::debug!(shard = inner.id, seq = ?seq, "Heartbeat requested by gateway");
            }
            OpCode::Reconnect => {
                return Some(Outcome::Reconnect("gateway requested a reconnect".to_string()));
            }
            OpCode::InvalidSession => {
                let resumable = message.as_invalid_session().unwrap_or(false);
                if !resumable {
                    self.clear_session();
                }
                return Some(Outcome::Reconnect(format!(
                    "session invalidated (resumable: {resumable})"
                )));
            }
            op => tracing::debug!(shard = inner.id, op = %op, "Ignoring unexpected opcode"),
        }

        None
    }

    fn on_hello(&self, message: &GatewayMessage, conn: &mut Connection) -> Option<Outcome> {
        let inner = self.inner();
        let Some(hello) = message.as_hello() else {
            let error = GatewayError::Decode("hello without a heartbeat interval".to_string());
            return Some(Outcome::Reconnect(error.to_string()));
        };

        if hello.heartbeat_interval == 0 {
            let error = GatewayError::Decode("hello with a zero heartbeat interval".to_string());
            return Some(Outcome::Reconnect(error.to_string()));
        }

        let interval = Duration::from_millis(hello.heartbeat_interval);
        conn.heartbeat = Some(HeartbeatDriver::start(
            inner.id,
            interval,
            inner.sequence.subscribe(),
            conn.tx.clone(),
            conn.beat_tx.clone(),
        ));
        self.set_status(ShardStatus::Identifying);

        let resume = {
            let sequence = *inner.sequence.borrow();
            inner.session.lock().resume(&inner.token, sequence)
        };

        match resume {
            Some(resume) => {
                tracing::info!(
                    shard = inner.id,
                    session = %resume.session_id,
                    seq = resume.seq,
                    "Resuming session"
                );
                self.queue(GatewayMessage::resume(&resume), conn.tx.clone(), false);
            }
            None => {
                self.clear_session();
                tracing::info!(
                    shard = inner.id,
                    heartbeat_ms = interval.as_millis(),
                    "Identifying"
                );
                let identify = GatewayMessage::identify(&self.shard.identify_payload());
                self.queue(identify, conn.tx.clone(), true);
            }
        }

        None
    }

    /// Queue a handshake frame for this socket through the general bucket,
    /// behind the shared identify queue when `identify` is set
    fn queue(&self, frame: GatewayMessage, tx: mpsc::UnboundedSender<Message>, identify: bool) {
        let inner = self.inner();
        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(shard = inner.id, error = %e, "Failed to encode handshake");
                return;
            }
        };

        let general = inner.general.clone();
        let result = match (&inner.identify_queue, identify) {
            (Some(queue), true) => queue.submit(Box::new(move || {
                Box::pin(async move {
                    let _ = general.submit(frame_job(text, tx));
                    None
                })
            })),
            _ => general.submit(frame_job(text, tx)),
        };

        if result.is_err() {
            tracing::error!(shard = inner.id, "Outbound queue closed");
        }
    }

    async fn on_dispatch(&self, message: GatewayMessage) {
        let inner = self.inner();
        match message.t.as_deref() {
            Some("READY") => match message.as_ready() {
                Some(ready) => {
                    tracing::info!(shard = inner.id, session = %ready.session_id, "Session ready");
                    inner.session.lock().establish(ready);
                    self.set_status(ShardStatus::Connected);
                }
                None => tracing::warn!(shard = inner.id, "READY without a session id"),
            },
            Some("RESUMED") => {
                let seq = *inner.sequence.borrow();
                tracing::info!(shard = inner.id, seq = ?seq, "Session resumed");
                self.set_status(ShardStatus::Connected);
            }
            _ => {}
        }

        let event = DispatchEvent {
            name: message.t.unwrap_or_default(),
            sequence: message.s,
            data: message.d,
        };
        self.emit(ShardEventKind::Dispatch(event)).await;
    }

    fn on_close(&self, code: Option<u16>) -> Outcome {
        match close_disposition(code) {
            CloseDisposition::Fatal(code) => Outcome::Fatal(GatewayError::Fatal(code)),
            CloseDisposition::Reconnect { keep_session } => {
                if !keep_session {
                    self.clear_session();
                }
                tracing::debug!(shard = self.inner().id, close_code = ?code, "Socket closed");
                Outcome::Reconnect(match code {
                    Some(code) => format!("closed with code {code}"),
                    None => "closed without a code".to_string(),
                })
            }
        }
    }

    fn clear_session(&self) {
        self.inner().session.lock().clear();
        self.inner().sequence.send_replace(None);
    }

    fn set_status(&self, status: ShardStatus) {
        let previous = self.inner().status.send_replace(status);
        if previous != status {
            tracing::debug!(
                shard = self.inner().id,
                from = ?previous,
                to = ?status,
                "Shard status changed"
            );
        }
    }

    /// Deliver an event, giving up once a stop is requested
    ///
    /// A consumer that stops reading must not keep the shard from stopping.
    /// Once stopped, an event still goes out if the buffer has room.
    async fn emit(&self, kind: ShardEventKind) {
        let event = ShardEvent {
            shard_id: self.inner().id,
            kind,
        };
        let mut shutdown = self.inner().shutdown.subscribe();

        tokio::select! {
            biased;
            // Nobody listening is not an error for the connection
            _ = self.events.send(event) => {}
            () = stop_requested(&mut shutdown) => {
                tracing::debug!(shard = self.inner().id, "Event buffer full at stop, dropping event");
            }
        }
    }
}
