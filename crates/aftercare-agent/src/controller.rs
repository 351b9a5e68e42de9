//! Support controller: the entry point for sessions and turns.
//!
//! One turn classifies the message, routes it to capabilities, fans out
//! their external calls, decides on escalation and composes the reply.
//! Turns on the same session are serialized; different sessions run in
//! parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use aftercare_adapters::{CallPolicy, ServiceAdapters};
use aftercare_core::config::AftercareConfig;
use aftercare_core::error::AftercareError;
use aftercare_core::store::SessionStore;
use aftercare_core::types::{
    EscalationReason, ImageRef, Message, RoutingState, Session, SessionFacts, SessionId, Timestamp,
};

use crate::composer::{self, ComposedReply};
use crate::dispatch::{Dispatcher, TurnInputs, TurnOutput};
use crate::error::SupportError;
use crate::escalation::{self, EscalationInput, EscalationSignal, TurnCounters};
use crate::extract;
use crate::handler::{HandlerOutcome, OutcomeStatus, TurnAction};
use crate::intent::{ClassifierInput, Intent, IntentClassifier, IntentLabel, PatternClassifier};
use crate::router::{self, Capability, RouteContext};
use crate::state::TurnMachine;

const CLARIFY_INTENT: &str = "I'm not sure I understood. Are you asking about tracking an order, \
a damaged item, an exchange or a refund?";

/// What a turn returns to the caller.
#[derive(Clone, Debug, Serialize)]
pub struct TurnReply {
    pub session_id: SessionId,
    pub reply: String,
    pub actions: Vec<TurnAction>,
    pub escalated: bool,
    pub escalation_reason: Option<EscalationReason>,
    /// `None` when the session was already with a human and nothing was classified.
    pub intent: Option<Intent>,
    pub routing_state: RoutingState,
}

/// Coordinates classification, routing, dispatch, escalation and composition.
pub struct SupportController {
    store: Arc<dyn SessionStore>,
    classifier: Arc<dyn IntentClassifier>,
    dispatcher: Dispatcher,
    policy: CallPolicy,
    config: AftercareConfig,
    gates: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SupportController {
    pub fn new(
        store: Arc<dyn SessionStore>,
        classifier: Arc<dyn IntentClassifier>,
        adapters: ServiceAdapters,
        config: AftercareConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            adapters,
            Duration::from_millis(config.turn.turn_timeout_ms),
            config.routing.clone(),
            config.escalation.clone(),
        );
        Self {
            store,
            classifier,
            dispatcher,
            policy: CallPolicy::from_config(&config.turn, &config.retry),
            config,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Controller with the built-in pattern classifier.
    pub fn with_pattern_classifier(
        store: Arc<dyn SessionStore>,
        adapters: ServiceAdapters,
        config: AftercareConfig,
    ) -> Self {
        Self::new(store, Arc::new(PatternClassifier::new()), adapters, config)
    }

    pub fn config(&self) -> &AftercareConfig {
        &self.config
    }

    pub fn create_session(&self) -> Result<Session, SupportError> {
        self.create_session_for_order(None)
    }

    /// Open a session, optionally already tied to an order.
    pub fn create_session_for_order(
        &self,
        order_id: Option<String>,
    ) -> Result<Session, SupportError> {
        let session = self.store.create()?;
        let order_id = order_id
            .map(|o| o.trim().trim_start_matches('#').to_string())
            .filter(|o| !o.is_empty());
        let session = match order_id {
            Some(order_id) => self.store.update(session.id, &mut |s: &mut Session| {
                s.facts.order_id = Some(order_id.clone());
                Ok(())
            })?,
            None => session,
        };
        info!(session_id = %session.id, order_id = ?session.facts.order_id, "Session created");
        Ok(session)
    }

    pub fn get_session(&self, id: SessionId) -> Result<Session, SupportError> {
        Ok(self.store.get(id)?)
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>, SupportError> {
        Ok(self.store.list()?)
    }

    /// Close a session. A turn still in flight will fail to commit.
    pub fn close_session(&self, id: SessionId) -> Result<Session, SupportError> {
        let session = self.store.close(id)?;
        self.drop_gate(id);
        info!(session_id = %id, "Session closed");
        Ok(session)
    }

    /// Close sessions idle longer than the configured timeout.
    pub fn sweep_inactive(&self, now: Timestamp) -> Result<Vec<SessionId>, SupportError> {
        let timeout_secs = self.config.session.inactivity_timeout_minutes as i64 * 60;
        let closed = self.store.close_inactive(Timestamp(now.0 - timeout_secs))?;
        for id in &closed {
            self.drop_gate(*id);
        }
        if !closed.is_empty() {
            info!(count = closed.len(), "Closed inactive sessions");
        }
        Ok(closed)
    }

    /// Handle one customer message and produce the reply.
    pub async fn handle_turn(
        &self,
        id: SessionId,
        text: &str,
        image: Option<ImageRef>,
    ) -> Result<TurnReply, SupportError> {
        // Validate message
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return Err(SupportError::EmptyMessage);
        }
        let max = self.config.session.max_message_length;
        if text.chars().count() > max {
            return Err(SupportError::MessageTooLong(max));
        }
        if let Some(image) = &image {
            self.dispatcher
                .adapters()
                .check_image(image)
                .map_err(|e| SupportError::InvalidImage(e.to_string()))?;
        }

        let gate = self.gate(id)?;
        let _turn = gate.lock().await;

        let mut message = Message::customer(text);
        if let Some(image) = image {
            message = message.with_image(image);
        }

        // Record the customer message
        let recorded = self.store.update(id, &mut |s: &mut Session| {
            if s.is_closed() {
                return Err(AftercareError::SessionClosed(s.id));
            }
            s.append(message.clone());
            Ok(())
        });
        let session = match recorded {
            Ok(session) => session,
            Err(err) => {
                if matches!(err, AftercareError::SessionNotFound(_)) {
                    self.drop_gate(id);
                }
                return Err(err.into());
            }
        };

        if session.escalated {
            return self.reply_while_escalated(&session);
        }

        let mut machine = TurnMachine::new(id);
        machine.advance(RoutingState::Classifying)?;

        // Classify
        let (intent, classifier_degraded) = self.classify(&session, &message).await;

        // Working facts for this turn
        let mut facts = session.facts.clone();
        if let Some(order_id) = extract::order_reference(text) {
            if facts.order_id.as_deref() != Some(order_id.as_str()) {
                facts = SessionFacts {
                    order_id: Some(order_id),
                    ..Default::default()
                };
            }
        }

        let ambiguous = !classifier_degraded
            && self
                .config
                .classifier
                .min_confidence
                .map(|min| intent.confidence < min)
                .unwrap_or(false);
        let low_confidence_streak = if ambiguous {
            session.low_confidence_streak + 1
        } else if classifier_degraded {
            session.low_confidence_streak
        } else {
            0
        };

        // Route and dispatch
        machine.advance(RoutingState::Dispatching)?;
        let output = if ambiguous {
            TurnOutput {
                outcomes: vec![HandlerOutcome::new(
                    Capability::General,
                    OutcomeStatus::NeedsClarification,
                    CLARIFY_INTENT,
                )],
                facts: facts.clone(),
                calls: Vec::new(),
            }
        } else {
            let route = RouteContext {
                order_known: facts.order_id.is_some(),
                total_known: facts.order_total.is_some(),
                names_item: extract::requested_item(text).is_some(),
                confirms_recommendation: facts.recommended_item.is_some()
                    && extract::is_confirmation(text),
            };
            let plan = router::plan(&intent, &route);
            debug!(session_id = %id, intent = %intent.label, stages = ?plan.stages, "Dispatch plan");
            self.dispatcher
                .run(
                    &mut machine,
                    plan,
                    &intent,
                    TurnInputs {
                        session: &session,
                        message: &message,
                        facts,
                        route,
                        now: Timestamp::now(),
                    },
                )
                .await?
        };
        machine.advance(RoutingState::Composing)?;

        // Failed resolution bookkeeping
        let mut failed_attempts = session.failed_resolution_attempts;
        for outcome in output
            .outcomes
            .iter()
            .filter(|o| o.capability == Capability::Resolution)
        {
            if outcome.status.is_failure() {
                failed_attempts += 1;
            } else if outcome.status.is_success() {
                failed_attempts = 0;
            }
        }

        let resolved_any = output.outcomes.iter().any(|o| o.status.is_success());
        let mut turns_without_resolution = if resolved_any {
            0
        } else {
            session.turns_without_resolution + 1
        };

        // Escalation
        let signal = escalation::evaluate(
            &EscalationInput {
                already_escalated: false,
                intent: &intent,
                text,
                outcomes: &output.outcomes,
                counters: TurnCounters {
                    failed_resolution_attempts: failed_attempts,
                    low_confidence_streak,
                    turns_without_resolution,
                    order_total: output.facts.order_total,
                },
                min_confidence: self.config.classifier.min_confidence,
            },
            &self.config.escalation,
        );
        if signal.escalate {
            failed_attempts = 0;
            turns_without_resolution = 0;
            machine.advance(RoutingState::Escalated)?;
        } else {
            machine.advance(RoutingState::Idle)?;
        }

        let reply = composer::compose(&output.outcomes, &signal);

        // Commit
        let final_state = machine.state();
        let reply_message = Message::agent(reply.text.clone());
        let facts = output.facts.clone();
        self.store.update(id, &mut |s: &mut Session| {
            if s.is_closed() {
                return Err(AftercareError::SessionClosed(s.id));
            }
            s.append(reply_message.clone());
            s.routing_state = final_state;
            s.failed_resolution_attempts = failed_attempts;
            s.low_confidence_streak = low_confidence_streak;
            s.turns_without_resolution = turns_without_resolution;
            s.facts = facts.clone();
            if signal.escalate {
                s.escalated = true;
                s.escalation_reason = signal.reason;
            }
            Ok(())
        })?;

        info!(
            session_id = %id,
            intent = %intent.label,
            confidence = intent.confidence,
            outcomes = output.outcomes.len(),
            calls = output.calls.len(),
            timed_out = output.timed_out_calls(),
            actions = reply.actions.len(),
            escalated = signal.escalate,
            "Turn completed"
        );

        Ok(self.turn_reply(id, reply, signal, Some(intent), final_state))
    }

    async fn classify(&self, session: &Session, message: &Message) -> (Intent, bool) {
        let prior = &session.messages[..session.messages.len().saturating_sub(1)];
        let window = self.config.classifier.history_window;
        let input = ClassifierInput {
            text: message.text.clone(),
            history: prior[prior.len().saturating_sub(window)..].to_vec(),
            has_image: message.image.is_some(),
        };

        let (result, attempts) = self
            .policy
            .run("classifier", || self.classifier.classify(&input))
            .await;
        match result {
            Ok(intent) => (intent, false),
            Err(err) => {
                warn!(session_id = %session.id, attempts, error = %err, "Classification failed, answering generally");
                (Intent::new(IntentLabel::GeneralInquiry, 0.0), true)
            }
        }
    }

    fn reply_while_escalated(&self, session: &Session) -> Result<TurnReply, SupportError> {
        let signal = EscalationSignal::because(EscalationReason::AlreadyEscalated);
        let reply = composer::compose(&[], &signal);
        let reply_message = Message::agent(reply.text.clone());
        self.store.update(session.id, &mut |s: &mut Session| {
            if s.is_closed() {
                return Err(AftercareError::SessionClosed(s.id));
            }
            s.append(reply_message.clone());
            Ok(())
        })?;
        debug!(session_id = %session.id, "Session already escalated, no dispatch");
        Ok(self.turn_reply(session.id, reply, signal, None, RoutingState::Escalated))
    }

    fn turn_reply(
        &self,
        id: SessionId,
        reply: ComposedReply,
        signal: EscalationSignal,
        intent: Option<Intent>,
        routing_state: RoutingState,
    ) -> TurnReply {
        TurnReply {
            session_id: id,
            reply: reply.text,
            actions: reply.actions,
            escalated: signal.escalate,
            escalation_reason: signal.reason,
            intent,
            routing_state,
        }
    }

    fn gate(&self, id: SessionId) -> Result<Arc<tokio::sync::Mutex<()>>, SupportError> {
        let mut gates = self
            .gates
            .lock()
            .map_err(|e| SupportError::Storage(format!("session gate lock poisoned: {}", e)))?;
        Ok(gates.entry(id).or_default().clone())
    }

    fn drop_gate(&self, id: SessionId) {
        if let Ok(mut gates) = self.gates.lock() {
            gates.remove(&id);
        }
    }
}
