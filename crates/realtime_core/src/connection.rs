use std::{collections::VecDeque, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use shared::protocol::ClientFrame;
use tokio::{
    net::TcpStream,
    sync::{Mutex, Notify},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};
use url::Url;

use crate::router::EventRouter;

pub(crate) const RECONNECT_RETRY_BUDGET: u32 = 10;
pub(crate) const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const REALTIME_PATH: &str = "/protected/ws";

pub fn realtime_endpoint(api_base: &str) -> Result<Url> {
    let mut endpoint =
        Url::parse(api_base).with_context(|| format!("invalid API base URL: {api_base}"))?;
    let scheme = match endpoint.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(anyhow!("API base URL must be http or https, got {other}")),
    };
    endpoint
        .set_scheme(scheme)
        .map_err(|()| anyhow!("cannot upgrade scheme of {api_base}"))?;
    endpoint.set_path(REALTIME_PATH);
    endpoint.set_query(None);
    endpoint.set_fragment(None);
    Ok(endpoint)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
}

/// `Queued` is not an error: the frame is held in the pending queue and
/// transmitted on the next successful open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Queued,
}

#[async_trait]
pub trait SocketSink: Send {
    async fn send(&mut self, frame: String) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

// None from next_frame means the peer closed.
#[async_trait]
pub trait SocketSource: Send {
    async fn next_frame(&mut self) -> Option<Result<String>>;
}

#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, endpoint: &Url)
        -> Result<(Box<dyn SocketSink>, Box<dyn SocketSource>)>;
}

pub struct WsConnector;

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(
        &self,
        endpoint: &Url,
    ) -> Result<(Box<dyn SocketSink>, Box<dyn SocketSource>)> {
        let (stream, _) = connect_async(endpoint.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {endpoint}"))?;
        let (writer, reader) = stream.split();
        Ok((Box::new(WsSink(writer)), Box::new(WsSource(reader))))
    }
}

struct WsSink(SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>);

#[async_trait]
impl SocketSink for WsSink {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.0.send(Message::Text(frame)).await.map_err(Into::into)
    }

    async fn close(&mut self) -> Result<()> {
        self.0.close().await.map_err(Into::into)
    }
}

struct WsSource(SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>);

#[async_trait]
impl SocketSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                // Pings and pongs are handled by tungstenite; binary frames
                // are not part of this protocol.
                Ok(_) => continue,
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

struct ConnectionInner {
    state: ConnectionState,
    sink: Option<Box<dyn SocketSink>>,
    pending: VecDeque<String>,
    intentionally_closed: bool,
    // Bumped by every connect() that starts a lifecycle; a task whose epoch
    // no longer matches has been superseded and must exit without touching
    // shared state.
    epoch: u64,
}

/// Owns the single realtime connection: state machine, pending FIFO queue for
/// sends attempted while not open, and the bounded auto-reconnect loop.
pub struct Connection {
    endpoint: Url,
    connector: Arc<dyn SocketConnector>,
    events: Arc<EventRouter>,
    inner: Mutex<ConnectionInner>,
    // Wakes the lifecycle's read loop whenever the sink is torn down out of
    // band (rejected send, mid-drain failure, intentional close), so the
    // loop never stays parked on a read half that outlived its write half.
    teardown: Notify,
}

impl Connection {
    pub fn new(
        endpoint: Url,
        connector: Arc<dyn SocketConnector>,
        events: Arc<EventRouter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            connector,
            events,
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Closed,
                sink: None,
                pending: VecDeque::new(),
                intentionally_closed: false,
                epoch: 0,
            }),
            teardown: Notify::new(),
        })
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// No-op while `Connecting` or `Open`; from `Closed` it always starts a
    /// fresh lifecycle, superseding any stale task that has not exited yet.
    pub async fn connect(self: &Arc<Self>) {
        let epoch = {
            let mut inner = self.inner.lock().await;
            if inner.state != ConnectionState::Closed {
                return;
            }
            inner.epoch += 1;
            inner.intentionally_closed = false;
            inner.state = ConnectionState::Connecting;
            inner.epoch
        };
        self.teardown.notify_one();
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            connection.run_lifecycle(epoch).await;
        });
    }

    /// Intentional close: no auto-reconnect until the next explicit
    /// `connect`; frames sent meanwhile queue indefinitely.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.intentionally_closed = true;
        inner.state = ConnectionState::Closed;
        if let Some(mut sink) = inner.sink.take() {
            let _ = sink.close().await;
        }
        self.teardown.notify_one();
    }

    /// Transmits immediately when open, otherwise queues (triggering a
    /// connect). An error means the transport rejected an immediate
    /// transmission; queued frames never error here.
    pub async fn send(self: &Arc<Self>, frame: &ClientFrame) -> Result<SendOutcome> {
        let encoded = frame.encode()?;
        let reconnect = {
            let mut inner = self.inner.lock().await;
            // Direct send only when open and nothing is queued ahead of us,
            // to keep FIFO order.
            if inner.state == ConnectionState::Open && inner.pending.is_empty() {
                if let Some(sink) = inner.sink.as_mut() {
                    return match sink.send(encoded).await {
                        Ok(()) => Ok(SendOutcome::Sent),
                        Err(err) => {
                            inner.state = ConnectionState::Closed;
                            inner.sink = None;
                            self.teardown.notify_one();
                            Err(err.context("realtime send rejected"))
                        }
                    };
                }
            }
            inner.pending.push_back(encoded);
            // After a manual close the frame queues indefinitely; only an
            // explicit connect revives the lifecycle.
            !inner.intentionally_closed
        };
        if reconnect {
            self.connect().await;
        }
        Ok(SendOutcome::Queued)
    }

    async fn run_lifecycle(self: Arc<Self>, epoch: u64) {
        let mut attempts: u32 = 0;
        loop {
            match self.connector.connect(&self.endpoint).await {
                Ok((sink, source)) => {
                    attempts = 0;
                    {
                        let mut inner = self.inner.lock().await;
                        if inner.epoch != epoch || inner.intentionally_closed {
                            return;
                        }
                        inner.sink = Some(sink);
                        inner.state = ConnectionState::Open;
                    }
                    info!(endpoint = %self.endpoint, "realtime connection open");
                    self.drain_pending(epoch).await;
                    self.read_until_closed(source, epoch).await;
                    let mut inner = self.inner.lock().await;
                    if inner.epoch != epoch {
                        return;
                    }
                    inner.sink = None;
                    inner.state = ConnectionState::Closed;
                }
                Err(err) => {
                    warn!(endpoint = %self.endpoint, "realtime connect failed: {err}");
                    let mut inner = self.inner.lock().await;
                    if inner.epoch != epoch {
                        return;
                    }
                    inner.state = ConnectionState::Closed;
                }
            }

            {
                let inner = self.inner.lock().await;
                if inner.epoch != epoch || inner.intentionally_closed {
                    return;
                }
            }
            attempts += 1;
            if attempts > RECONNECT_RETRY_BUDGET {
                warn!(
                    attempts,
                    "reconnect budget exhausted; staying closed until an explicit connect"
                );
                return;
            }
            {
                let mut inner = self.inner.lock().await;
                if inner.epoch != epoch {
                    return;
                }
                inner.state = ConnectionState::Connecting;
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
            let inner = self.inner.lock().await;
            if inner.epoch != epoch || inner.intentionally_closed {
                return;
            }
        }
    }

    // A failed frame goes back to the front and the remainder stays queued
    // for the next open.
    async fn drain_pending(&self, epoch: u64) {
        loop {
            let mut inner = self.inner.lock().await;
            if inner.epoch != epoch || inner.state != ConnectionState::Open {
                return;
            }
            let Some(frame) = inner.pending.pop_front() else {
                return;
            };
            let Some(sink) = inner.sink.as_mut() else {
                inner.pending.push_front(frame);
                return;
            };
            if let Err(err) = sink.send(frame.clone()).await {
                warn!("queued send failed, keeping remaining frames: {err}");
                inner.pending.push_front(frame);
                inner.state = ConnectionState::Closed;
                inner.sink = None;
                self.teardown.notify_one();
                return;
            }
        }
    }

    async fn read_until_closed(&self, mut source: Box<dyn SocketSource>, epoch: u64) {
        loop {
            tokio::select! {
                frame = source.next_frame() => match frame {
                    Some(Ok(frame)) => {
                        if self.inner.lock().await.epoch != epoch {
                            return;
                        }
                        self.events.dispatch(&frame);
                    }
                    Some(Err(err)) => {
                        warn!("realtime receive failed: {err}");
                        return;
                    }
                    None => return,
                },
                _ = self.teardown.notified() => {
                    // A stored permit can predate this socket; only leave if
                    // the sink is actually gone or this loop was superseded.
                    let inner = self.inner.lock().await;
                    if inner.epoch != epoch
                        || inner.intentionally_closed
                        || inner.sink.is_none()
                    {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
