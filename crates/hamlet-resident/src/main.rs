//! hamlet-resident — runs every configured resident against one broker.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hamlet_core::agent::{Agent, AgentSettings};
use hamlet_core::config::{Config, LogFormat};
use hamlet_core::decision::{Decide, ProviderChain};
use hamlet_core::events::AgentEvent;

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Log what an agent reports. A disconnect is terminal: the agent will not
/// reconnect on its own. Shutdown on Ctrl+C only shows up as a status change.
fn watch_agent<D: Decide>(agent: &Agent<D>) {
    let name = agent.name().to_string();
    let mut events = agent.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(AgentEvent::Disconnected(d)) => {
                    warn!("{} is disconnected from the broker: {}", name, d.reason);
                }
                Ok(event) => debug!("{}", event.to_json()),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    debug!("{} event watcher lagged {} events", name, n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config_path = std::env::var("HAMLET_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| project_root.join("config.yaml"));

    let have_file = config_path.is_file();
    let config = if have_file {
        Config::load(&config_path)?
    } else {
        Config::from_env()?
    };

    init_tracing(config.log_format);
    if !have_file {
        info!("No config at {}; using defaults", config_path.display());
    }

    let decider = Arc::new(
        ProviderChain::from_config(&config).context("Failed to build LLM client")?,
    );
    info!("LLM providers: {}", decider.names().join(" -> "));
    let settings = AgentSettings::from_config(&config);

    let cancel = CancellationToken::new();
    let mut agents = JoinSet::new();
    for resident in &config.residents {
        let mut agent = Agent::from_resident(resident, decider.clone(), settings.clone());
        watch_agent(&agent);
        let agent_cancel = cancel.child_token();
        agents.spawn(async move {
            let result = agent.run(agent_cancel).await;
            (agent.name().to_string(), result)
        });
    }

    let names: Vec<&str> = config.residents.iter().map(|r| r.name.as_str()).collect();
    info!(
        "{} resident(s) moving in at {}: {}",
        names.len(),
        config.broker_url,
        names.join(", ")
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        info!("Shutdown signal received, stopping residents...");
        shutdown.cancel();
    });

    // One resident failing to connect leaves the others running.
    while let Some(joined) = agents.join_next().await {
        match joined {
            Ok((name, Ok(()))) => info!("{} stopped.", name),
            Ok((name, Err(e))) => error!("{} could not start: {:#}", name, anyhow::Error::new(e)),
            Err(e) => error!("Resident task panicked: {}", e),
        }
    }

    info!("All residents stopped.");
    Ok(())
}
