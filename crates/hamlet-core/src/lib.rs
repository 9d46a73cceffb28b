//! hamlet-core — residents of a pub/sub town, no process plumbing.
//!
//! An [`agent::Agent`] holds one websocket session to the broker, listens on
//! it from a spawned task, and feeds a paced reactor through an inbox. The
//! reactor asks a [`decision::Decide`] implementation what to say and publishes
//! the answer back on the topic the message came from. Supervisors watch
//! agents through [`events::AgentEvent`] broadcasts.

pub mod agent;
pub mod config;
pub mod decision;
pub mod error;
pub mod events;
pub mod inbox;
pub mod reactor;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;
