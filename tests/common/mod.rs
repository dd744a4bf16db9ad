#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voicerag::transport::BoxFuture;
use voicerag::{
    CloseReason, Error, Frame, FrameSink, FrameSource, Leg, ModelConnector, Relay, RelayBuilder,
    Result,
};

pub const WAIT: Duration = Duration::from_secs(2);
pub const QUIET: Duration = Duration::from_millis(150);

/// What the relay wrote to one side.
#[derive(Debug)]
pub enum Outbound {
    Frame(Value),
    Close(CloseReason),
}

struct MockSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl FrameSink for MockSink {
    fn send(&mut self, frame: Frame) -> BoxFuture<'_, Result<()>> {
        let sent = self.tx.send(Outbound::Frame(frame.into_value()));
        Box::pin(async move { sent.map_err(|_| Error::ConnectionClosed) })
    }

    fn close(&mut self, reason: CloseReason) -> BoxFuture<'_, Result<()>> {
        let _ = self.tx.send(Outbound::Close(reason));
        Box::pin(async { Ok(()) })
    }
}

struct MockSource {
    rx: mpsc::UnboundedReceiver<Result<Frame>>,
}

impl FrameSource for MockSource {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<Frame>>> {
        Box::pin(async move { self.rx.recv().await.transpose() })
    }
}

/// The far end of a mock leg, driven by the test.
pub struct Peer {
    tx: Option<mpsc::UnboundedSender<Result<Frame>>>,
    rx: mpsc::UnboundedReceiver<Outbound>,
}

pub fn leg_pair() -> (Leg, Peer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let leg = Leg::new(MockSink { tx: out_tx }, MockSource { rx: in_rx });
    (
        leg,
        Peer {
            tx: Some(in_tx),
            rx: out_rx,
        },
    )
}

impl Peer {
    pub fn send(&self, value: Value) {
        let frame = Frame::parse(&value.to_string()).expect("test frame is an object");
        self.tx
            .as_ref()
            .expect("peer still open")
            .send(Ok(frame))
            .expect("relay is reading");
    }

    /// Makes the relay's next read fail.
    pub fn fail(&self) {
        self.tx
            .as_ref()
            .expect("peer still open")
            .send(Err(Error::ConnectionClosed))
            .expect("relay is reading");
    }

    /// Closes this peer's side cleanly.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    pub async fn recv(&mut self) -> Outbound {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for the relay")
            .expect("relay dropped the leg")
    }

    pub async fn recv_frame(&mut self) -> Value {
        match self.recv().await {
            Outbound::Frame(value) => value,
            Outbound::Close(reason) => panic!("expected a frame, got close {reason:?}"),
        }
    }

    pub async fn recv_close(&mut self) -> CloseReason {
        match self.recv().await {
            Outbound::Close(reason) => reason,
            Outbound::Frame(value) => panic!("expected a close, got {value}"),
        }
    }

    /// Asserts nothing arrives for a short while.
    pub async fn expect_quiet(&mut self) {
        if let Ok(Some(out)) = tokio::time::timeout(QUIET, self.rx.recv()).await {
            panic!("expected no traffic, got {out:?}");
        }
    }
}

/// Hands out one pre-built model leg, or fails every connect.
pub struct MockConnector {
    leg: Mutex<Option<Leg>>,
    failure: Option<fn() -> Error>,
    pub request_ids: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    pub fn new(leg: Leg) -> Self {
        Self {
            leg: Mutex::new(Some(leg)),
            failure: None,
            request_ids: Arc::default(),
        }
    }

    pub fn failing(failure: fn() -> Error) -> Self {
        Self {
            leg: Mutex::new(None),
            failure: Some(failure),
            request_ids: Arc::default(),
        }
    }
}

impl ModelConnector for MockConnector {
    fn connect<'a>(&'a self, request_id: &'a str) -> BoxFuture<'a, Result<Leg>> {
        self.request_ids
            .lock()
            .expect("lock")
            .push(request_id.to_string());
        let result = match self.failure {
            Some(failure) => Err(failure()),
            None => self
                .leg
                .lock()
                .expect("lock")
                .take()
                .ok_or(Error::ConnectionClosed),
        };
        Box::pin(async move { result })
    }
}

/// A running session with both far ends under test control.
pub struct Session {
    pub client: Peer,
    pub model: Peer,
    pub request_ids: Arc<Mutex<Vec<String>>>,
    pub task: JoinHandle<()>,
}

impl Session {
    /// Builds a relay from `builder` and attaches a mock client to it.
    pub fn start(builder: RelayBuilder) -> Self {
        let (model_leg, model) = leg_pair();
        let connector = MockConnector::new(model_leg);
        let request_ids = Arc::clone(&connector.request_ids);
        let relay = builder.connector(connector).build().expect("relay builds");
        let (client, task) = attach(relay, Some("req-1".to_string()));
        Self {
            client,
            model,
            request_ids,
            task,
        }
    }

    /// Starts the session and consumes the policy frame.
    pub async fn started(builder: RelayBuilder) -> Self {
        let mut session = Self::start(builder);
        let policy = session.model.recv_frame().await;
        assert_eq!(policy["type"], "session.update");
        session
    }

    pub async fn ended(self) {
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("session did not end")
            .expect("session task panicked");
    }
}

pub fn attach(relay: Relay, request_id: Option<String>) -> (Peer, JoinHandle<()>) {
    let (client_leg, client) = leg_pair();
    let task = tokio::spawn(async move { relay.attach(client_leg, request_id).await });
    (client, task)
}
