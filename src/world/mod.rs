//! The world runtime: permissions, containment, the interaction DSL,
//! action handlers, the tick engine and the response envelope.

pub mod actions;
pub mod dsl;
pub mod envelope;
pub mod lifecycle;
pub mod perms;
pub mod signup;
pub mod tick;
pub mod view;

/// Tick period; also the long-poll cap for `/wait`
pub const TICK_INTERVAL_MS: i64 = 10_000;

/// AP granted to every agent at each tick boundary
pub const MAX_AP: i64 = 4;

/// Purchased AP allowed per tick
pub const MAX_BUY_AP: i64 = 20;

/// Purchased AP allowed per `buy_ap` call
pub const MAX_BUY_PER_CALL: i64 = 10;

/// Hard ceiling on an agent's AP balance
pub const AP_CEILING: i64 = MAX_AP + MAX_BUY_AP;

/// Maximum container-edge distance from any instance to its root
pub const MAX_CONTAINMENT_DEPTH: usize = 5;

/// Interaction rules an instance may run per tick, across all verbs
pub const MAX_INTERACTIONS_PER_TICK: i64 = 4;

/// Events drained into a single response envelope
pub const MAX_EVENTS_PER_ENVELOPE: i64 = 200;

/// Idle cutoff before an agent is sent to limbo
pub const IDLE_TIMEOUT_MS: i64 = 600_000;

/// Undelivered events older than this are garbage-collected
pub const EVENT_TTL_MS: i64 = 300_000;

/// Starting perception cap for new agents (caps clamp to 1..=100)
pub const DEFAULT_PERCEPTION_CAP: i64 = 20;
