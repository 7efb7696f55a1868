//! Stream session controller: turn claims, the follow-up queue, the turn
//! driver and tool dispatch.

pub mod consent;
pub mod controller;
pub mod hooks;
pub mod state;

pub use consent::{ConsentDecision, ConsentGate, ConsentRequest, FixedConsent};
pub use controller::{SessionConfig, SessionController, SessionDeps, SettledCallback};
pub use hooks::{CacheScope, NoopHooks, TurnHooks};
pub use state::{ConversationState, RejectReason, StartOutcome, StartRequest};
