//! Core control loop for the uplinkd multi-WAN failover daemon
//! (`spec.md` §1): the collector framework, decision engine, controller
//! adapter, telemetry store, discovery, and the orchestrator that binds
//! them into one tick loop.

pub mod collector;
pub mod controller;
pub mod decision;
pub mod discovery;
pub mod orchestrator;
pub mod retry;
pub mod store;

pub use orchestrator::{
    Action, ComponentHealth, DaemonState, LogLevelController, MemberView, Orchestrator, OrchestratorError, Snapshot,
};
