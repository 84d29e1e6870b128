use crate::endpoint::ensure_websocket_scheme;
use crate::error::ChannelError;
use crate::machine::{CloseOutcome, ConnectionMachine, ConnectionState};
use crate::message;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Supplies the access token appended as `?token=` on every connect attempt.
pub type TokenSource = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// チャンネル設定オプション
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Delay before the first reconnect attempt
    pub initial_backoff: Duration,
    /// Ceiling for the doubling backoff
    pub max_backoff: Duration,
    /// Reconnect attempts before giving up
    pub max_attempts: u32,
    /// Random spread applied to each delay, 0.0 to 1.0. Off by default.
    pub jitter_ratio: f64,
    pub heartbeat_interval: Option<Duration>,
    pub connect_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
            max_attempts: 5,
            jitter_ratio: 0.0,
            heartbeat_interval: Some(Duration::from_secs(30)),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ChannelOptions {
    pub fn with_initial_backoff(mut self, value: Duration) -> Self {
        self.initial_backoff = value;
        self
    }

    pub fn with_max_backoff(mut self, value: Duration) -> Self {
        self.max_backoff = value;
        self
    }

    pub fn with_max_attempts(mut self, value: u32) -> Self {
        self.max_attempts = value;
        self
    }

    pub fn with_jitter_ratio(mut self, value: f64) -> Self {
        self.jitter_ratio = value.clamp(0.0, 1.0);
        self
    }

    /// A zero interval disables the heartbeat, like `None`.
    pub fn with_heartbeat_interval(mut self, value: Option<Duration>) -> Self {
        self.heartbeat_interval = value.filter(|period| !period.is_zero());
        self
    }

    pub fn with_connect_timeout(mut self, value: Duration) -> Self {
        self.connect_timeout = value;
        self
    }
}

/// チャンネルイベント
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    StateChanged(ConnectionState),
    /// One parsed inbound frame, in arrival order
    Message(Value),
    Error(ChannelError),
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Retries are used up. Call `reconnect` or close the channel.
    Exhausted { attempts: u32 },
}

#[derive(Debug)]
enum Command {
    Send(String),
    Reconnect,
    Close,
}

/// Cloneable handle for pushing frames from other tasks.
#[derive(Clone)]
pub struct ChannelSender {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    torn_down: Arc<AtomicBool>,
}

impl ChannelSender {
    /// Serializes `payload` and hands it to the open transport.
    ///
    /// Returns false without sending anything when the channel is not open.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        if !self.is_open() {
            warn!("Channel not open, message not sent");
            return false;
        }
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize outgoing message: {}", e);
                return false;
            }
        };
        self.commands.send(Command::Send(text)).is_ok()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        if self.torn_down.load(Ordering::SeqCst) {
            return ConnectionState::Closed;
        }
        *self.state.borrow()
    }

    /// Restarts the retry cycle. Only honored once the channel is exhausted.
    pub fn reconnect(&self) -> bool {
        if self.state() != ConnectionState::Exhausted {
            debug!("reconnect() ignored in state {:?}", self.state());
            return false;
        }
        self.commands.send(Command::Reconnect).is_ok()
    }

    fn teardown(&self) {
        if !self.torn_down.swap(true, Ordering::SeqCst) {
            info!("Channel teardown requested");
            let _ = self.commands.send(Command::Close);
        }
    }
}

/// WebSocket channel that reconnects with exponential backoff.
///
/// Spawns its driver task on the current tokio runtime. Dropping the channel
/// tears it down.
pub struct ReconnectingChannel {
    url: Url,
    sender: ChannelSender,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    task: Option<JoinHandle<()>>,
}

impl ReconnectingChannel {
    /// チャンネルを開く
    pub fn open(url: &str, options: ChannelOptions) -> Result<Self, ChannelError> {
        Self::spawn(url, options, None)
    }

    /// Same as [`open`](Self::open), with an access token on every attempt.
    pub fn open_with_token(
        url: &str,
        options: ChannelOptions,
        token: TokenSource,
    ) -> Result<Self, ChannelError> {
        Self::spawn(url, options, Some(token))
    }

    fn spawn(
        url: &str,
        options: ChannelOptions,
        token: Option<TokenSource>,
    ) -> Result<Self, ChannelError> {
        let url = Url::parse(url)?;
        ensure_websocket_scheme(&url)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let torn_down = Arc::new(AtomicBool::new(false));

        let driver = Driver {
            url: url.clone(),
            machine: ConnectionMachine::new(
                options.initial_backoff,
                options.max_backoff,
                options.max_attempts,
            ),
            options,
            token,
            commands: command_rx,
            events: event_tx,
            state: state_tx,
            torn_down: torn_down.clone(),
        };
        info!("Opening channel {}", url);
        let task = tokio::spawn(driver.run());

        Ok(Self {
            url,
            sender: ChannelSender {
                commands: command_tx,
                state: state_rx,
                torn_down,
            },
            events: event_rx,
            task: Some(task),
        })
    }

    /// Next event, or `None` once the channel is torn down.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        if self.sender.torn_down.load(Ordering::SeqCst) {
            return None;
        }
        self.events.recv().await
    }

    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        self.sender.send(payload)
    }

    pub fn is_open(&self) -> bool {
        self.sender.is_open()
    }

    pub fn state(&self) -> ConnectionState {
        self.sender.state()
    }

    /// 接続状態変更の通知を受け取るためのレシーバーを取得
    pub fn on_state_change(&self) -> watch::Receiver<ConnectionState> {
        self.sender.state.clone()
    }

    pub fn reconnect(&self) -> bool {
        self.sender.reconnect()
    }

    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// URL without the access token
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// 切断処理
    pub fn close(&self) {
        self.sender.teardown();
    }

    /// Tears down and waits for the driver task to finish.
    pub async fn close_and_wait(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Channel task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ReconnectingChannel {
    fn drop(&mut self) {
        self.sender.teardown();
    }
}

enum Attempt {
    Connected(WsStream),
    Failed,
    TornDown,
}

enum Pump {
    Dropped,
    TornDown,
}

struct Driver {
    url: Url,
    options: ChannelOptions,
    token: Option<TokenSource>,
    machine: ConnectionMachine,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
    torn_down: Arc<AtomicBool>,
}

impl Driver {
    async fn run(mut self) {
        self.emit(ChannelEvent::StateChanged(ConnectionState::Connecting));
        loop {
            match self.attempt().await {
                Attempt::Connected(stream) => {
                    self.machine.on_open();
                    info!("Channel open: {}", self.url);
                    self.emit_state();
                    if let Pump::TornDown = self.pump(stream).await {
                        break;
                    }
                }
                Attempt::Failed => {}
                Attempt::TornDown => break,
            }
            if !self.after_close().await {
                break;
            }
        }
        self.machine.teardown();
        self.state.send_replace(ConnectionState::Closed);
        debug!("Channel driver for {} finished", self.url);
    }

    fn connect_url(&self) -> Url {
        let mut url = self.url.clone();
        if let Some(token) = self.token.as_ref().and_then(|source| source()) {
            url.query_pairs_mut().append_pair("token", &token);
        }
        url
    }

    async fn attempt(&mut self) -> Attempt {
        let url = self.connect_url();
        debug!("Connecting to {}", self.url);
        let connect = tokio::time::timeout(self.options.connect_timeout, connect_async(url.as_str()));
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(Ok((stream, _response))) => Attempt::Connected(stream),
                        Ok(Err(e)) => {
                            warn!("Connect to {} failed: {}", self.url, e);
                            self.emit(ChannelEvent::Error(e.into()));
                            Attempt::Failed
                        }
                        Err(_) => {
                            warn!("Connect to {} timed out", self.url);
                            self.emit(ChannelEvent::Error(ChannelError::Transport(format!(
                                "connect timed out after {:?}",
                                self.options.connect_timeout
                            ))));
                            Attempt::Failed
                        }
                    };
                }
                command = self.commands.recv() => match command {
                    None | Some(Command::Close) => return Attempt::TornDown,
                    Some(Command::Send(_)) => warn!("Dropping message, channel not open"),
                    Some(Command::Reconnect) => trace!("reconnect ignored while connecting"),
                },
            }
        }
    }

    /// Every drop and failed attempt ends up here. Returns false on teardown.
    async fn after_close(&mut self) -> bool {
        match self.machine.on_close() {
            CloseOutcome::Reconnect { attempt, delay } => {
                self.emit_state();
                info!(
                    "Reconnecting to {} in {:?} (attempt {}/{})",
                    self.url, delay, attempt, self.options.max_attempts
                );
                self.emit(ChannelEvent::ReconnectScheduled { attempt, delay });

                let sleep = tokio::time::sleep(self.jittered(delay));
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => break,
                        command = self.commands.recv() => match command {
                            None | Some(Command::Close) => return false,
                            Some(Command::Send(_)) => warn!("Dropping message, channel not open"),
                            Some(Command::Reconnect) => trace!("reconnect ignored while waiting"),
                        },
                    }
                }
                self.machine.on_reconnect_due()
            }
            CloseOutcome::Exhausted { attempts } => {
                error!(
                    "Giving up on {} after {} reconnect attempts",
                    self.url, attempts
                );
                self.emit_state();
                self.emit(ChannelEvent::Exhausted { attempts });
                loop {
                    match self.commands.recv().await {
                        None | Some(Command::Close) => return false,
                        Some(Command::Reconnect) => {
                            if self.machine.reconnect() {
                                info!("Manual reconnect to {}", self.url);
                                self.emit_state();
                                return true;
                            }
                        }
                        Some(Command::Send(_)) => warn!("Dropping message, channel exhausted"),
                    }
                }
            }
            CloseOutcome::Ignored => {
                debug!("Close ignored in state {:?}", self.machine.state());
                false
            }
        }
    }

    async fn pump(&mut self, stream: WsStream) -> Pump {
        let (mut write, mut read) = stream.split();
        // the field is public, so a zero period can still arrive here
        let period = self.options.heartbeat_interval.filter(|period| !period.is_zero());
        let mut heartbeat = period.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    None | Some(Command::Close) => {
                        if let Err(e) = write.send(Message::Close(None)).await {
                            debug!("Close frame not sent: {}", e);
                        }
                        return Pump::TornDown;
                    }
                    Some(Command::Send(text)) => {
                        trace!("Sending: {}", text);
                        if let Err(e) = write.send(Message::Text(text)).await {
                            warn!("Send failed on {}: {}", self.url, e);
                            self.emit(ChannelEvent::Error(e.into()));
                            return Pump::Dropped;
                        }
                    }
                    Some(Command::Reconnect) => trace!("reconnect ignored while open"),
                },

                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.deliver(&text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => self.deliver(&text),
                        Err(e) => self.emit(ChannelEvent::Error(ChannelError::Parse {
                            error: e.to_string(),
                            raw: String::new(),
                        })),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!("Channel {} closed by server: {:?}", self.url, frame);
                        return Pump::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(WsError::ConnectionClosed)) | None => {
                        info!("Channel {} closed", self.url);
                        return Pump::Dropped;
                    }
                    Some(Err(e)) => {
                        warn!("Read error on {}: {}", self.url, e);
                        self.emit(ChannelEvent::Error(e.into()));
                        return Pump::Dropped;
                    }
                },

                _ = tick(&mut heartbeat) => {
                    trace!("Sending heartbeat");
                    if let Err(e) = write.send(Message::Text(message::ping().to_string())).await {
                        warn!("Heartbeat failed on {}: {}", self.url, e);
                        self.emit(ChannelEvent::Error(e.into()));
                        return Pump::Dropped;
                    }
                }
            }
        }
    }

    fn deliver(&self, text: &str) {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.emit(ChannelEvent::Message(value)),
            Err(e) => {
                warn!("Dropping unparseable message: {}", e);
                self.emit(ChannelEvent::Error(ChannelError::Parse {
                    error: e.to_string(),
                    raw: text.to_string(),
                }));
            }
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let ratio = self.options.jitter_ratio;
        if ratio <= 0.0 {
            return delay;
        }
        let spread = delay.as_secs_f64() * ratio.min(1.0);
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }

    fn emit_state(&self) {
        let state = self.machine.state();
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            debug!("Channel {} state -> {:?}", self.url, state);
            self.emit(ChannelEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ChannelEvent) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.events.send(event);
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
