//! AgentEvent enum — broadcast from an Agent to whoever supervises it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::types::{
    AgentState, DisconnectData, ExchangeData, FailureData, StatusData, TopicData,
};

/// Events broadcast from an Agent's tasks to all subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum AgentEvent {
    /// Connection state changed
    #[serde(rename = "status")]
    Status(StatusData),

    /// A topic joined the subscription set
    #[serde(rename = "subscribed")]
    Subscribed(TopicData),

    /// The reactor picked a message off the inbox
    #[serde(rename = "received")]
    Received(ExchangeData),

    /// A reply went out
    #[serde(rename = "replied")]
    Replied(ExchangeData),

    /// The decision function gave nothing usable; no reply was sent
    #[serde(rename = "decision_failed")]
    DecisionFailed(FailureData),

    /// A reply was decided but there was no session to carry it
    #[serde(rename = "reply_dropped")]
    ReplyDropped(ExchangeData),

    /// The broker side went away; the agent will not reconnect
    #[serde(rename = "disconnected")]
    Disconnected(DisconnectData),
}

impl AgentEvent {
    /// `{"event": "...", "data": {...}}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Shared by an agent's receive task and reactor: the current state plus a
/// broadcast of everything that happens.
#[derive(Debug, Clone)]
pub struct Reporter {
    agent: Arc<str>,
    state: Arc<watch::Sender<AgentState>>,
    events: broadcast::Sender<AgentEvent>,
}

impl Reporter {
    pub fn new(agent: &str) -> Self {
        let (state, _) = watch::channel(AgentState::Unconnected);
        let (events, _) = broadcast::channel(256);
        Self {
            agent: Arc::from(agent),
            state: Arc::new(state),
            events,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn set_state(&self, state: AgentState) {
        if self.state.send_replace(state) != state {
            self.emit(AgentEvent::Status(StatusData {
                agent: self.agent.to_string(),
                state,
                timestamp: now(),
            }));
        }
    }

    pub fn emit(&self, event: AgentEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
