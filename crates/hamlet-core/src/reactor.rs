//! The reaction loop — one inbox message per tick, decided by the model,
//! answered on the topic it arrived on.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::decision::Decide;
use crate::error::DecisionError;
use crate::events::{now, AgentEvent, Reporter};
use crate::inbox::Inbox;
use crate::session::Session;
use crate::types::{AgentState, ExchangeData, FailureData, InboundMessage};

/// What one iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Inbox was empty.
    Idle,
    Replied { topic: String, content: String },
    /// The decision function failed; nothing was published.
    Skipped { topic: String, error: String },
    /// A reply was decided but the session could not take it.
    Unsent { topic: String, content: String },
}

pub fn system_instruction(name: &str, persona: &str) -> String {
    format!("You are {}. Persona: {}", name, persona)
}

pub fn build_prompt(message: &InboundMessage) -> String {
    let payload = serde_json::to_string(&message.payload)
        .unwrap_or_else(|_| message.payload.content.clone());
    format!(
        "You received a message on topic {}: {}. How do you reply?",
        message.topic, payload
    )
}

pub struct Reactor<D> {
    name: String,
    system: String,
    inbox: Inbox,
    session: Session,
    decider: D,
    tick: Duration,
    deadline: Duration,
    reporter: Reporter,
}

impl<D: Decide> Reactor<D> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        persona: &str,
        inbox: Inbox,
        session: Session,
        decider: D,
        tick: Duration,
        deadline: Duration,
        reporter: Reporter,
    ) -> Self {
        Self {
            name: name.to_string(),
            system: system_instruction(name, persona),
            inbox,
            session,
            decider,
            tick: tick.max(Duration::from_millis(1)),
            deadline,
            reporter,
        }
    }

    /// React to at most one pending message.
    pub async fn react_once(&mut self) -> Reaction {
        let Some(message) = self.inbox.try_dequeue() else {
            return Reaction::Idle;
        };
        info!("{} received: {} on {}", self.name, message.payload.content, message.topic);
        self.reporter.emit(AgentEvent::Received(ExchangeData {
            agent: self.name.clone(),
            topic: message.topic.clone(),
            sender: message.origin().to_string(),
            content: message.payload.content.clone(),
            timestamp: now(),
        }));

        match self.decide(&message).await {
            Ok(reply) => {
                // After `Closed` the writer may still be draining; nothing new goes out.
                let sent = self.reporter.state() != AgentState::Closed
                    && self.session.publish(&message.topic, &reply, &self.name);
                let exchange = ExchangeData {
                    agent: self.name.clone(),
                    topic: message.topic.clone(),
                    sender: self.name.clone(),
                    content: reply.clone(),
                    timestamp: now(),
                };
                if !sent {
                    warn!("{} has no broker session; reply on {} dropped", self.name, message.topic);
                    self.reporter.emit(AgentEvent::ReplyDropped(exchange));
                    return Reaction::Unsent {
                        topic: message.topic,
                        content: reply,
                    };
                }
                self.reporter.emit(AgentEvent::Replied(exchange));
                Reaction::Replied {
                    topic: message.topic,
                    content: reply,
                }
            }
            Err(e) => {
                error!("LLM error: {}", e);
                self.reporter.emit(AgentEvent::DecisionFailed(FailureData {
                    agent: self.name.clone(),
                    topic: message.topic.clone(),
                    error: e.to_string(),
                    timestamp: now(),
                }));
                Reaction::Skipped {
                    topic: message.topic,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn decide(&self, message: &InboundMessage) -> Result<String, DecisionError> {
        let prompt = build_prompt(message);
        let reply = tokio::time::timeout(self.deadline, self.decider.decide(&self.system, &prompt))
            .await
            .map_err(|_| DecisionError::Timeout(self.deadline))??;
        if reply.trim().is_empty() {
            return Err(DecisionError::Empty);
        }
        Ok(reply)
    }

    /// Tick until cancelled. Nothing that happens to a single message stops
    /// the loop.
    ///
    /// Cancelling while a reply is being decided abandons that message: it
    /// has already left the inbox and is neither answered nor requeued.
    /// Messages still in the inbox stay there unread.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("{} is listening.", self.name);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.react_once() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.tick) => {}
            }
        }
        info!("{} stopped reacting ({} message(s) left unread).", self.name, self.inbox.len());
    }
}
