//! Shared types for the uplinkd multi-WAN failover daemon.
//!
//! This crate contains no behavior — only the data model (`spec.md` §3) and
//! the frozen configuration struct (`spec.md` §6) that every other crate in
//! the workspace builds on. Keeping it dependency-light means both the core
//! control loop and the daemon's config loader can depend on it without
//! pulling in unrelated machinery.

pub mod config;
pub mod event;
pub mod member;
pub mod metrics;
pub mod sample;
pub mod score;
pub mod state;

pub use config::Config;
pub use event::{Event, EventKind};
pub use member::{Member, MemberClass};
pub use metrics::Metrics;
pub use sample::Sample;
pub use score::Score;
pub use state::{MemberState, MemberStatus};
