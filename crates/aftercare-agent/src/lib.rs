//! Conversational post-purchase support agent.
//!
//! A turn flows through classification ([`intent`]), routing ([`router`]),
//! concurrent handler dispatch ([`dispatch`], [`handler`]), escalation
//! ([`escalation`]) and composition ([`composer`]). [`SupportController`]
//! ties them to a [`aftercare_core::SessionStore`].

pub mod composer;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod escalation;
pub mod extract;
pub mod handler;
pub mod intent;
pub mod router;
pub mod state;

pub use composer::{compose, ComposedReply};
pub use controller::{SupportController, TurnReply};
pub use error::SupportError;
pub use escalation::EscalationSignal;
pub use handler::{HandlerOutcome, OutcomeStatus, TurnAction};
pub use intent::{ClassifierInput, Intent, IntentClassifier, IntentLabel, PatternClassifier};
pub use router::{Capability, DispatchPlan};
