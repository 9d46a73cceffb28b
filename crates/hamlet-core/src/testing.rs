//! Test fixtures: an in-process broker and a scripted decider.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::decision::Decide;
use crate::error::DecisionError;

/// Accepts exactly one websocket client.
pub struct TestBroker {
    pub url: String,
    conn_rx: oneshot::Receiver<WebSocketStream<TcpStream>>,
}

impl TestBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, conn_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let _ = tx.send(ws);
        });
        Self { url, conn_rx }
    }

    /// An address nothing is listening on.
    pub async fn unused_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{}", addr)
    }

    pub async fn accept(self) -> BrokerPeer {
        let ws = tokio::time::timeout(Duration::from_secs(5), self.conn_rx)
            .await
            .expect("no client connected")
            .unwrap();
        BrokerPeer { ws }
    }
}

/// The broker's end of one client connection.
pub struct BrokerPeer {
    ws: WebSocketStream<TcpStream>,
}

impl BrokerPeer {
    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::text(text.to_string())).await.unwrap();
    }

    /// Next text frame as JSON, skipping control frames.
    pub async fn next_json(&mut self) -> serde_json::Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("client disconnected")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    /// Wait up to `wait` for a text frame; `None` if nothing arrives.
    pub async fn maybe_json(&mut self, wait: Duration) -> Option<serde_json::Value> {
        match tokio::time::timeout(wait, self.next_json()).await {
            Ok(v) => Some(v),
            Err(_) => None,
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

pub enum Step {
    Reply(&'static str),
    Fail,
    /// Never resolves.
    Hang,
}

/// Decider that plays back a script and records every call.
#[derive(Default)]
pub struct ScriptedDecider {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedDecider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Decide for ScriptedDecider {
    async fn decide(&self, system: &str, prompt: &str) -> Result<String, DecisionError> {
        self.calls
            .lock()
            .unwrap()
            .push((system.to_string(), prompt.to_string()));
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(text)) => Ok(text.to_string()),
            Some(Step::Fail) | None => Err(DecisionError::Status {
                status: 503,
                body: "scripted failure".into(),
            }),
            Some(Step::Hang) => std::future::pending().await,
        }
    }
}
