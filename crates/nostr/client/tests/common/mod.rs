//! Scripted in-process relay for integration tests.
//!
//! A [`MockRelay`] accepts WebSocket connections on an ephemeral port, records
//! every client frame and answers with whatever its script returns.

#![allow(dead_code)]

use futures::{Sink, SinkExt, StreamExt};
use nostr_core::{Event, EventSigner, EventTemplate, SecretKeySigner, validate_auth_event, verify_event};
use relay_client::RelayClientConfig;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Config with short timeouts so failing paths finish quickly.
pub fn fast_config() -> RelayClientConfig {
    RelayClientConfig::new()
        .with_connect_timeout(Duration::from_secs(2))
        .with_ok_timeout(Duration::from_secs(2))
        .with_auth_timeout(Duration::from_secs(2))
        .with_query_timeout(Duration::from_secs(2))
}

pub fn signer() -> Arc<SecretKeySigner> {
    Arc::new(SecretKeySigner::generate().unwrap())
}

pub fn note(signer: &dyn EventSigner, content: &str) -> Event {
    signer.sign(&EventTemplate::new(1, vec![], content)).unwrap()
}

/// A frame the relay sends.
#[derive(Debug, Clone)]
pub enum Frame {
    Json(Value),
    Raw(String),
    /// Close the socket
    Close,
}

pub fn ok(event_id: &str, accepted: bool, message: &str) -> Frame {
    Frame::Json(json!(["OK", event_id, accepted, message]))
}

pub fn eose(subscription_id: &str) -> Frame {
    Frame::Json(json!(["EOSE", subscription_id]))
}

pub fn closed(subscription_id: &str, reason: &str) -> Frame {
    Frame::Json(json!(["CLOSED", subscription_id, reason]))
}

pub fn notice(message: &str) -> Frame {
    Frame::Json(json!(["NOTICE", message]))
}

pub fn event(subscription_id: &str, event: &Event) -> Frame {
    Frame::Json(json!(["EVENT", subscription_id, event]))
}

/// Frame tag ("EVENT", "REQ", ...).
pub fn tag(frame: &Value) -> &str {
    frame[0].as_str().unwrap_or_default()
}

/// Subscription id of a REQ or CLOSE.
pub fn sub_id(frame: &Value) -> String {
    frame[1].as_str().unwrap_or_default().to_string()
}

/// Event id of an EVENT or AUTH sent by the client.
pub fn event_id(frame: &Value) -> String {
    frame[1]["id"].as_str().unwrap_or_default().to_string()
}

/// Per-connection relay state.
#[derive(Debug)]
pub struct Session {
    pub connection: usize,
    pub url: String,
    pub challenge: Option<String>,
    pub authenticated: bool,
}

impl Session {
    /// Issue a challenge and remember it.
    pub fn challenge(&mut self, value: &str) -> Frame {
        self.challenge = Some(value.to_string());
        Frame::Json(json!(["AUTH", value]))
    }

    /// Check an AUTH frame against the current challenge.
    pub fn check_auth(&mut self, frame: &Value) -> bool {
        let Some(challenge) = &self.challenge else {
            return false;
        };
        let Ok(auth_event) = serde_json::from_value::<Event>(frame[1].clone()) else {
            return false;
        };
        let valid = verify_event(&auth_event).unwrap_or(false)
            && validate_auth_event(&auth_event, challenge, &self.url).is_ok();
        if valid {
            self.authenticated = true;
        }
        valid
    }
}

type ConnectScript = dyn Fn(&mut Session) -> Vec<Frame> + Send + Sync;
type FrameScript = dyn Fn(&Value, &mut Session) -> Vec<Frame> + Send + Sync;

pub struct MockRelay {
    url: String,
    received: Arc<Mutex<Vec<(usize, Value)>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockRelay {
    pub async fn start<F>(on_frame: F) -> Self
    where
        F: Fn(&Value, &mut Session) -> Vec<Frame> + Send + Sync + 'static,
    {
        Self::start_with(|_| Vec::new(), on_frame).await
    }

    pub async fn start_with<C, F>(on_connect: C, on_frame: F) -> Self
    where
        C: Fn(&mut Session) -> Vec<Frame> + Send + Sync + 'static,
        F: Fn(&Value, &mut Session) -> Vec<Frame> + Send + Sync + 'static,
    {
        init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let on_connect: Arc<ConnectScript> = Arc::new(on_connect);
        let on_frame: Arc<FrameScript> = Arc::new(on_frame);

        let task = {
            let url = url.clone();
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let session = Session {
                        connection: connections.fetch_add(1, Ordering::SeqCst),
                        url: url.clone(),
                        challenge: None,
                        authenticated: false,
                    };
                    tokio::spawn(serve(
                        stream,
                        session,
                        Arc::clone(&on_connect),
                        Arc::clone(&on_frame),
                        Arc::clone(&received),
                    ));
                }
            })
        };

        Self {
            url,
            received,
            connections,
            task,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of WebSocket connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Every client frame received, in order.
    pub fn received(&self) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub fn tags(&self) -> Vec<String> {
        self.received().iter().map(|f| tag(f).to_string()).collect()
    }

    /// Wait until at least `count` frames arrived (or `wait` passes).
    pub async fn wait_for_frames(&self, count: usize, wait: Duration) -> Vec<Value> {
        let deadline = Instant::now() + wait;
        loop {
            let frames = self.received();
            if frames.len() >= count || Instant::now() >= deadline {
                return frames;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    mut session: Session,
    on_connect: Arc<ConnectScript>,
    on_frame: Arc<FrameScript>,
    received: Arc<Mutex<Vec<(usize, Value)>>>,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();

    for frame in on_connect(&mut session) {
        if !send(&mut sink, frame).await {
            return;
        }
    }

    while let Some(Ok(msg)) = source.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };

        received
            .lock()
            .unwrap()
            .push((session.connection, value.clone()));

        for frame in on_frame(&value, &mut session) {
            if !send(&mut sink, frame).await {
                return;
            }
        }
    }
}

async fn send<S>(sink: &mut S, frame: Frame) -> bool
where
    S: Sink<Message> + Unpin,
{
    match frame {
        Frame::Json(value) => sink.send(Message::Text(value.to_string().into())).await.is_ok(),
        Frame::Raw(text) => sink.send(Message::Text(text.into())).await.is_ok(),
        Frame::Close => {
            let _ = sink.close().await;
            false
        }
    }
}

/// URL of a port nothing listens on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

/// Accepts TCP connections but never completes the WebSocket handshake.
pub struct BlackHole {
    url: String,
    task: JoinHandle<()>,
}

impl BlackHole {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        Self { url, task }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for BlackHole {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Relay that accepts every EVENT.
pub fn accept_all(frame: &Value, _: &mut Session) -> Vec<Frame> {
    match tag(frame) {
        "EVENT" => vec![ok(&event_id(frame), true, "")],
        "REQ" => vec![eose(&sub_id(frame))],
        _ => vec![],
    }
}

/// Relay that rejects every EVENT with `reason`.
pub fn reject_all(reason: &'static str) -> impl Fn(&Value, &mut Session) -> Vec<Frame> + Send + Sync + 'static {
    move |frame, _| match tag(frame) {
        "EVENT" => vec![ok(&event_id(frame), false, reason)],
        _ => vec![],
    }
}

/// Relay that never answers.
pub fn silent(_: &Value, _: &mut Session) -> Vec<Frame> {
    Vec::new()
}
