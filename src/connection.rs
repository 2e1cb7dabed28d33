use crate::auth::AuthClient;
use crate::credentials::Credential;
use crate::error::{Result, WebackError};
use crate::map::MapDocument;
use crate::protocol::{InboundFrame, OutboundEnvelope};
use crate::scheduler::{refresh_interval_for, IDLE_REFRESH_INTERVAL};
use crate::status::StatusStore;
use crate::types::LinkState;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Publishes without any inbound frame before the link is considered dead
pub const WATCHDOG_LIMIT: u32 = 5;

/// Send attempts made by [`SocketSession::publish`]
pub const PUBLISH_ATTEMPTS: u32 = 8;

const CONNECT_WAIT_POLLS: u32 = 15;
const CONNECT_WAIT_STEP: Duration = Duration::from_millis(500);
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// The socket endpoint wants a basic auth header but ignores its value
const BASIC_AUTH_PLACEHOLDER: &str = "Basic KG51bGwpOihudWxsKQ==";

/// Lifecycle and data events sent by a socket task to the session
///
/// Every event carries the generation of the socket that produced it, so
/// events from a socket that was already replaced are dropped.
#[derive(Debug)]
enum LinkEvent {
    Opened { generation: u64 },
    Closed { generation: u64 },
    Errored { generation: u64, error: String },
    Frame { generation: u64, text: String },
}

struct ActiveSocket {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

/// Session fields shared by the event pump and the callers
struct SessionState {
    auth: Arc<AuthClient>,
    link: watch::Sender<LinkState>,
    interval: watch::Sender<Duration>,
    status: Arc<StatusStore>,
    map: RwLock<Option<MapDocument>>,
    unanswered: AtomicU32,
    generation: AtomicU64,
    socket: Mutex<Option<ActiveSocket>>,
    close_when_idle: bool,
}

impl SessionState {
    fn link_state(&self) -> LinkState {
        *self.link.borrow()
    }

    fn set_link(&self, state: LinkState) {
        let previous = self.link.send_replace(state);
        if previous != state {
            tracing::debug!("Link {} -> {}", previous, state);
        }
    }

    fn set_interval(&self, interval: Duration) {
        self.interval.send_if_modified(|current| {
            if *current == interval {
                return false;
            }
            tracing::debug!("Refresh interval {:?} -> {:?}", current, interval);
            *current = interval;
            true
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn send_text(&self, text: String) -> Result<()> {
        let socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        match socket.as_ref() {
            Some(active) => active
                .outbound
                .send(Message::Text(text))
                .map_err(|_| WebackError::ConnectionClosed),
            None => Err(WebackError::ConnectionClosed),
        }
    }

    fn release_socket(&self, generation: u64) {
        let mut socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        if socket.as_ref().is_some_and(|active| active.generation == generation) {
            *socket = None;
        }
    }

    /// Close the socket and forget it, whatever state it is in
    fn force_close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let active = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.set_link(LinkState::Disconnected);

        if let Some(ActiveSocket {
            outbound, mut task, ..
        }) = active
        {
            tracing::info!("Closing socket");
            // Dropping the sender makes the socket task close gracefully
            drop(outbound);
            tokio::spawn(async move {
                if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                    task.abort();
                }
            });
        }
    }

    fn handle_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Opened { generation } if self.is_current(generation) => {
                tracing::info!("Socket connected");
                self.set_link(LinkState::Connected);
            }
            LinkEvent::Closed { generation } if self.is_current(generation) => {
                tracing::info!("Socket closed");
                self.release_socket(generation);
                self.set_link(LinkState::Disconnected);
            }
            LinkEvent::Errored { generation, error } if self.is_current(generation) => {
                tracing::warn!("Socket error: {}", error);
                self.release_socket(generation);
                self.set_link(LinkState::Faulted);
            }
            LinkEvent::Frame { generation, text } if self.is_current(generation) => {
                self.handle_frame(&text);
            }
            stale => tracing::trace!("Ignoring event from a replaced socket: {:?}", stale),
        }
    }

    fn handle_frame(&self, text: &str) {
        tracing::trace!("Received: {}", text);

        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Dropping unreadable frame: {}", e);
                return;
            }
        };
        self.unanswered.store(0, Ordering::SeqCst);

        match frame {
            InboundFrame::StatusUpdate(status) => {
                self.status.apply(status);
                self.adapt_interval();
            }
            InboundFrame::MapData(payload) => {
                if let Err(e) = self.install_map(&payload) {
                    tracing::warn!("Ignoring map update, keeping previous map: {}", e);
                }
                self.adapt_interval();
            }
            InboundFrame::Unknown(kind) => {
                tracing::warn!("{}", WebackError::UnknownMessage(kind));
            }
        }
    }

    /// Follow the last known status's cadence and drop an idle link
    fn adapt_interval(&self) {
        let Some(status) = self.status.current() else {
            return;
        };
        let interval = refresh_interval_for(&status);
        self.set_interval(interval);

        if self.close_when_idle && interval == IDLE_REFRESH_INTERVAL {
            tracing::debug!("Robot is idle, releasing the socket");
            self.force_close();
        }
    }

    fn install_map(&self, payload: &str) -> Result<()> {
        {
            let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(current) = map.as_mut() {
                current.merge(payload)?;
            } else {
                *map = Some(MapDocument::decode(payload)?);
            }
        }
        tracing::debug!("Map updated");
        self.status.notify_map();
        Ok(())
    }
}

fn build_request(credential: &Credential) -> Result<Request> {
    let header = |value: &str| {
        HeaderValue::from_str(value)
            .map_err(|e| WebackError::Transport(format!("invalid socket header value: {e}")))
    };

    let mut request = credential.wss_url.as_str().into_client_request()?;
    let headers = request.headers_mut();
    headers.insert("Authorization", HeaderValue::from_static(BASIC_AUTH_PLACEHOLDER));
    headers.insert("region", header(&credential.region_name)?);
    headers.insert("token", header(&credential.jwt_token)?);
    Ok(request)
}

/// Drive one socket until it closes, reporting everything as events
async fn run_socket(
    request: Request,
    generation: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    let stream = match connect_async(request).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            let _ = events.send(LinkEvent::Errored {
                generation,
                error: e.to_string(),
            });
            return;
        }
    };
    let _ = events.send(LinkEvent::Opened { generation });

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(msg) => {
                    if let Err(e) = write.send(msg).await {
                        tracing::error!("Failed to send message: {}", e);
                        let _ = events.send(LinkEvent::Errored { generation, error: e.to_string() });
                        return;
                    }
                }
                None => {
                    let _ = tokio::time::timeout(CLOSE_GRACE, write.close()).await;
                    let _ = events.send(LinkEvent::Closed { generation });
                    return;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(LinkEvent::Frame { generation, text });
                }
                Some(Ok(Message::Close(_))) | None => {
                    let _ = events.send(LinkEvent::Closed { generation });
                    return;
                }
                Some(Err(e)) => {
                    let _ = events.send(LinkEvent::Errored { generation, error: e.to_string() });
                    return;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}

/// One robot's WebSocket link
///
/// Socket tasks never touch the session directly. They report lifecycle
/// changes and frames as events, and a single pump task applies them to the
/// link state, the status store and the map.
pub struct SocketSession {
    state: Arc<SessionState>,
    events: mpsc::UnboundedSender<LinkEvent>,
    pump: JoinHandle<()>,
}

impl SocketSession {
    /// Create a disconnected session
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(auth: Arc<AuthClient>, status: Arc<StatusStore>, close_when_idle: bool) -> Self {
        let initial_interval = status
            .current()
            .map(|status| refresh_interval_for(&status))
            .unwrap_or(crate::scheduler::ACTIVE_REFRESH_INTERVAL);

        let (link, _) = watch::channel(LinkState::Disconnected);
        let (interval, _) = watch::channel(initial_interval);
        let state = Arc::new(SessionState {
            auth,
            link,
            interval,
            status,
            map: RwLock::new(None),
            unanswered: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            socket: Mutex::new(None),
            close_when_idle,
        });

        let (events, mut events_rx) = mpsc::unbounded_channel();
        let pump_state = state.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                pump_state.handle_event(event);
            }
        });

        Self {
            state,
            events,
            pump,
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.state.link_state()
    }

    /// Watch link state transitions
    pub fn watch_link(&self) -> watch::Receiver<LinkState> {
        self.state.link.subscribe()
    }

    pub fn refresh_interval(&self) -> Duration {
        *self.state.interval.borrow()
    }

    pub fn set_refresh_interval(&self, interval: Duration) {
        self.state.set_interval(interval);
    }

    /// Watch refresh interval changes
    pub fn watch_refresh_interval(&self) -> watch::Receiver<Duration> {
        self.state.interval.subscribe()
    }

    /// Publishes sent since the last inbound frame
    pub fn unanswered(&self) -> u32 {
        self.state.unanswered.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> &Arc<StatusStore> {
        &self.state.status
    }

    /// Snapshot of the current map
    pub fn map(&self) -> Option<MapDocument> {
        self.state
            .map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Decode `payload` and install it, merging into the current map if any
    pub fn install_map(&self, payload: &str) -> Result<()> {
        self.state.install_map(payload)
    }

    /// Start opening a new socket, replacing any previous one
    async fn open(&self) -> Result<()> {
        let credential = match self.state.auth.ensure_credentials().await {
            Ok(credential) => credential,
            Err(e) => {
                self.state.set_link(LinkState::Disconnected);
                return Err(e);
            }
        };
        let request = build_request(&credential)?;

        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        self.state.set_link(LinkState::Connecting);
        tracing::info!("Connecting to {}", credential.wss_url);

        let task = tokio::spawn(run_socket(request, generation, self.events.clone(), outbound_rx));
        let previous = self
            .state
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(ActiveSocket {
                generation,
                outbound,
                task,
            });
        if let Some(previous) = previous {
            previous.task.abort();
        }
        Ok(())
    }

    /// Connect and wait for the socket to open
    ///
    /// Waits at most 15 × 0.5 s. Returns at once if already connected, and
    /// fails early if the new socket faults while opening.
    pub async fn connect(&self) -> Result<()> {
        if self.link_state() == LinkState::Connected {
            return Ok(());
        }
        self.open().await?;

        for _ in 0..CONNECT_WAIT_POLLS {
            match self.link_state() {
                LinkState::Connected => return Ok(()),
                LinkState::Faulted => return Err(WebackError::ConnectionClosed),
                _ => tokio::time::sleep(CONNECT_WAIT_STEP).await,
            }
        }

        if self.link_state() == LinkState::Connected {
            return Ok(());
        }
        tracing::warn!("Socket did not connect in time");
        Err(WebackError::Timeout)
    }

    /// Close the socket now
    pub fn force_close(&self) {
        self.state.force_close();
    }

    /// Send an envelope, reconnecting as needed
    ///
    /// Auth failures while reconnecting are returned at once. Anything else
    /// is retried, and [`WebackError::DeliveryFailed`] is returned once every
    /// attempt failed.
    pub async fn publish(&self, envelope: &OutboundEnvelope) -> Result<()> {
        let unanswered = self.unanswered();
        if unanswered >= WATCHDOG_LIMIT {
            tracing::warn!(
                "{} messages sent without any reply, the link looks dead, reconnecting",
                unanswered
            );
            self.state.unanswered.store(0, Ordering::SeqCst);
            self.force_close();
        }

        let text = serde_json::to_string(&envelope.to_wire())?;

        for attempt in 1..=PUBLISH_ATTEMPTS {
            if self.link_state() == LinkState::Connected {
                match self.state.send_text(text.clone()) {
                    Ok(()) => {
                        self.state.unanswered.fetch_add(1, Ordering::SeqCst);
                        tracing::debug!("Sent to {}: {}", envelope.thing_name(), text);
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::debug!("Send failed ({}/{}): {}", attempt, PUBLISH_ATTEMPTS, e);
                        self.state.set_link(LinkState::Disconnected);
                    }
                }
            } else {
                tracing::debug!("Socket not connected ({}/{}), connecting", attempt, PUBLISH_ATTEMPTS);
                match self.connect().await {
                    Ok(()) => {}
                    Err(e @ WebackError::Auth(_)) => return Err(e),
                    Err(e) => tracing::debug!("Connect failed: {}", e),
                }
            }
        }

        tracing::error!(
            "Failed to deliver message to {} after {} attempts",
            envelope.thing_name(),
            PUBLISH_ATTEMPTS
        );
        Err(WebackError::DeliveryFailed {
            attempts: PUBLISH_ATTEMPTS,
        })
    }
}

impl Drop for SocketSession {
    fn drop(&mut self) {
        self.pump.abort();
        let active = self
            .state
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(active) = active {
            active.task.abort();
        }
    }
}
