//! Agent — identity, subscriptions, and the connect → listen → react lifecycle.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::{Config, Resident};
use crate::decision::Decide;
use crate::error::ConnectionError;
use crate::events::{now, AgentEvent, Reporter};
use crate::inbox::inbox;
use crate::reactor::Reactor;
use crate::session::{self, ReceiveEnd, Session};
use crate::types::{AgentState, DisconnectData, ResidentInfo, TopicData, TOWN_HALL};

/// Topics an agent has joined. Grows only; there is no unsubscribe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscriptions(BTreeSet<String>);

impl Subscriptions {
    /// Returns true when the topic is new.
    pub fn add(&mut self, topic: &str) -> bool {
        self.0.insert(topic.to_string())
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.0.contains(topic)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Per-agent runtime knobs.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub broker_url: String,
    pub tick: Duration,
    pub decision_deadline: Duration,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            broker_url: config.broker_url.clone(),
            tick: config.tick(),
            decision_deadline: config.decision_deadline(),
        }
    }
}

pub struct Agent<D> {
    name: String,
    persona: String,
    subscriptions: Subscriptions,
    session: Session,
    decider: Arc<D>,
    settings: AgentSettings,
    reporter: Reporter,
}

impl<D: Decide> Agent<D> {
    pub fn new(name: &str, persona: &str, decider: Arc<D>, settings: AgentSettings) -> Self {
        Self {
            name: name.to_string(),
            persona: persona.to_string(),
            subscriptions: Subscriptions::default(),
            session: Session::default(),
            decider,
            settings,
            reporter: Reporter::new(name),
        }
    }

    pub fn from_resident(resident: &Resident, decider: Arc<D>, settings: AgentSettings) -> Self {
        Self::new(&resident.name, &resident.persona, decider, settings)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn persona(&self) -> &str {
        &self.persona
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    pub fn state(&self) -> AgentState {
        self.reporter.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.reporter.watch_state()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AgentEvent> {
        self.reporter.subscribe()
    }

    pub fn info(&self) -> ResidentInfo {
        ResidentInfo {
            name: self.name.clone(),
            state: self.state(),
            subscriptions: self.subscriptions.iter().map(String::from).collect(),
        }
    }

    /// Send a `subscribe` frame and record the topic. Repeat calls resend the
    /// frame but leave a single entry. Without a session this does nothing.
    pub fn subscribe(&mut self, topic: &str) -> bool {
        if !self.session.subscribe(topic) {
            return false;
        }
        if self.subscriptions.add(topic) {
            info!("{} subscribed to {}", self.name, topic);
            self.reporter.emit(AgentEvent::Subscribed(TopicData {
                agent: self.name.clone(),
                topic: topic.to_string(),
            }));
        }
        true
    }

    /// Connect, start listening, join the town hall, then react until
    /// `cancel` fires. Errors only when the connect fails or the agent has
    /// already run to `Closed`.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), ConnectionError> {
        let span = info_span!("agent", name = %self.name);
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(&mut self, cancel: CancellationToken) -> Result<(), ConnectionError> {
        if self.state() == AgentState::Closed {
            warn!("{} is closed; refusing to reconnect", self.name);
            return Err(ConnectionError::AlreadyClosed(self.name.clone()));
        }

        let conn = match session::connect(&self.settings.broker_url).await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Connection failed: {}", e);
                return Err(e);
            }
        };
        self.session = conn.session;
        self.reporter.set_state(AgentState::Connected);
        info!("{} connected to broker", self.name);

        let (inbox_tx, inbox_rx) = inbox();
        let reporter = self.reporter.clone();
        let listen_cancel = cancel.child_token();
        let listener = tokio::spawn(
            async move {
                let end = session::receive_loop(conn.frames, inbox_tx, listen_cancel).await;
                if end != ReceiveEnd::Cancelled {
                    warn!("Receive loop ended: {}; no reconnect", end);
                    reporter.emit(AgentEvent::Disconnected(DisconnectData {
                        agent: reporter.agent().to_string(),
                        reason: end.to_string(),
                        timestamp: now(),
                    }));
                    reporter.set_state(AgentState::Closed);
                }
                end
            }
            .in_current_span(),
        );

        self.subscribe(TOWN_HALL);

        let reactor = Reactor::new(
            &self.name,
            &self.persona,
            inbox_rx,
            self.session.clone(),
            self.decider.clone(),
            self.settings.tick,
            self.settings.decision_deadline,
            self.reporter.clone(),
        );
        reactor.run(cancel.clone()).await;

        // The reactor only returns once `cancel` has fired, which also stops
        // the listener through its child token.
        let _ = listener.await;
        self.session.close();
        self.reporter.set_state(AgentState::Closed);
        info!("{} is shutting down.", self.name);
        Ok(())
    }

    /// A pre-built session, for exercising subscriptions without a broker.
    #[cfg(test)]
    pub(crate) fn attach(&mut self, session: Session) {
        self.session = session;
    }
}
