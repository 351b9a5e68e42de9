//! Per-turn fan-out and fan-in.
//!
//! Every external call of a stage is spawned at once. The turn shares one
//! deadline; a call still running at the deadline is detached and recorded as
//! timed out, and whatever it returns later is discarded.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use aftercare_adapters::{
    CallStatus, ExternalCallRecord, ServiceAdapters, ServiceError, ServiceRequest,
};
use aftercare_core::config::{EscalationConfig, RoutingConfig};
use aftercare_core::types::{Message, RoutingState, Session, SessionFacts, Timestamp};

use crate::error::SupportError;
use crate::handler::{HandlerContext, HandlerOutcome, HandlerPlan, HandlerSet};
use crate::intent::Intent;
use crate::router::{self, Capability, DispatchPlan, RouteContext};
use crate::state::TurnMachine;

/// What the dispatcher needs to know about the turn.
pub struct TurnInputs<'a> {
    pub session: &'a Session,
    pub message: &'a Message,
    /// Session facts including anything extracted from this message.
    pub facts: SessionFacts,
    pub route: RouteContext,
    pub now: Timestamp,
}

/// Everything a turn's dispatch produced.
#[derive(Debug, Default)]
pub struct TurnOutput {
    pub outcomes: Vec<HandlerOutcome>,
    /// Facts after every outcome was folded in.
    pub facts: SessionFacts,
    pub calls: Vec<ExternalCallRecord>,
}

impl TurnOutput {
    pub fn timed_out_calls(&self) -> usize {
        self.calls.iter().filter(|c| c.timed_out()).count()
    }
}

/// Runs dispatch plans against the service adapters.
pub struct Dispatcher {
    adapters: ServiceAdapters,
    handlers: HandlerSet,
    turn_timeout: Duration,
    routing: RoutingConfig,
    escalation: EscalationConfig,
}

struct PlannedCalls {
    slot: usize,
    capability: Capability,
    requests: Vec<ServiceRequest>,
}

impl Dispatcher {
    pub fn new(
        adapters: ServiceAdapters,
        turn_timeout: Duration,
        routing: RoutingConfig,
        escalation: EscalationConfig,
    ) -> Self {
        Self {
            adapters,
            handlers: HandlerSet::new(),
            turn_timeout,
            routing,
            escalation,
        }
    }

    pub fn routing(&self) -> &RoutingConfig {
        &self.routing
    }

    pub fn adapters(&self) -> &ServiceAdapters {
        &self.adapters
    }

    /// Run the plan plus at most one follow-up stage.
    ///
    /// Expects `machine` in `Dispatching`; leaves it in `Dispatching` or
    /// `Awaiting`, ready for `Composing`.
    pub async fn run(
        &self,
        machine: &mut TurnMachine,
        plan: DispatchPlan,
        intent: &Intent,
        inputs: TurnInputs<'_>,
    ) -> Result<TurnOutput, SupportError> {
        let deadline = Instant::now() + self.turn_timeout;
        let mut output = TurnOutput {
            facts: inputs.facts.clone(),
            ..Default::default()
        };
        let mut stages: VecDeque<Vec<Capability>> = plan.stages.into();
        let mut followed_up = false;

        loop {
            let stage = match stages.pop_front() {
                Some(stage) => stage,
                None if !followed_up => {
                    followed_up = true;
                    match router::follow_up(
                        intent,
                        &inputs.route,
                        &output.outcomes,
                        self.routing.defect_confidence_threshold,
                    ) {
                        Some(extra) => {
                            debug!(stage = ?extra, "Follow-up stage");
                            extra
                        }
                        None => break,
                    }
                }
                None => break,
            };

            if matches!(machine.state(), RoutingState::Awaiting { .. }) {
                machine.advance(RoutingState::Dispatching)?;
            }
            self.run_stage(machine, &stage, intent, &inputs, deadline, &mut output)
                .await?;
        }
        Ok(output)
    }

    async fn run_stage(
        &self,
        machine: &mut TurnMachine,
        stage: &[Capability],
        intent: &Intent,
        inputs: &TurnInputs<'_>,
        deadline: Instant,
        output: &mut TurnOutput,
    ) -> Result<(), SupportError> {
        let mut slots: Vec<Option<HandlerOutcome>> = vec![None; stage.len()];
        let mut planned = Vec::new();
        {
            let ctx = self.context(inputs, &output.facts, &output.outcomes);
            for (slot, capability) in stage.iter().copied().enumerate() {
                match self.handlers.get(capability).plan(&ctx, intent) {
                    HandlerPlan::Immediate(outcome) => slots[slot] = Some(outcome),
                    HandlerPlan::Calls(requests) => planned.push(PlannedCalls {
                        slot,
                        capability,
                        requests,
                    }),
                }
            }
        }

        let outstanding: usize = planned.iter().map(|p| p.requests.len()).sum();
        if outstanding > 0 {
            machine.advance(RoutingState::Awaiting { outstanding })?;
        }

        // Fan out everything first, then collect.
        let in_flight: Vec<(Capability, usize, Vec<InFlight>)> = planned
            .into_iter()
            .map(|p| {
                let calls = p
                    .requests
                    .into_iter()
                    .map(|request| self.spawn(request, deadline))
                    .collect();
                (p.capability, p.slot, calls)
            })
            .collect();

        let mut finished = Vec::with_capacity(in_flight.len());
        for (capability, slot, calls) in in_flight {
            let mut records = Vec::with_capacity(calls.len());
            for call in calls {
                records.push(call.collect(deadline).await);
            }
            finished.push((capability, slot, records));
        }

        {
            let ctx = self.context(inputs, &output.facts, &output.outcomes);
            for (capability, slot, records) in &finished {
                let outcome = self.handlers.get(*capability).handle(&ctx, intent, records);
                debug!(
                    capability = %capability,
                    status = ?outcome.status,
                    calls = records.len(),
                    "Handler finished"
                );
                slots[*slot] = Some(outcome);
            }
        }

        for outcome in slots.into_iter().flatten() {
            outcome.facts.apply_to(&mut output.facts);
            output.outcomes.push(outcome);
        }
        output
            .calls
            .extend(finished.into_iter().flat_map(|(_, _, records)| records));
        Ok(())
    }

    fn context<'a>(
        &'a self,
        inputs: &'a TurnInputs<'a>,
        facts: &'a SessionFacts,
        prior: &'a [HandlerOutcome],
    ) -> HandlerContext<'a> {
        HandlerContext {
            session: inputs.session,
            facts,
            message: inputs.message,
            prior,
            routing: &self.routing,
            escalation: &self.escalation,
            now: inputs.now,
        }
    }

    fn spawn(&self, request: ServiceRequest, deadline: Instant) -> InFlight {
        if Instant::now() >= deadline {
            return InFlight::Skipped(request);
        }
        let adapters = self.adapters.clone();
        let task_request = request.clone();
        let handle = tokio::spawn(async move { adapters.execute(task_request).await });
        InFlight::Running { request, handle }
    }
}

enum InFlight {
    Running {
        request: ServiceRequest,
        handle: tokio::task::JoinHandle<ExternalCallRecord>,
    },
    /// The turn deadline passed before the call could start.
    Skipped(ServiceRequest),
}

impl InFlight {
    async fn collect(self, deadline: Instant) -> ExternalCallRecord {
        match self {
            InFlight::Running { request, handle } => {
                match tokio::time::timeout_at(deadline, handle).await {
                    Ok(Ok(record)) => record,
                    Ok(Err(join_err)) => {
                        warn!(adapter = request.adapter(), error = %join_err, "External call task failed");
                        let mut record = ExternalCallRecord::pending(request);
                        record.status =
                            CallStatus::Failed(ServiceError::Permanent(join_err.to_string()));
                        record
                    }
                    Err(_) => {
                        // Dropping the handle detaches the task; its result is ignored.
                        warn!(adapter = request.adapter(), "External call exceeded turn deadline");
                        let mut record = ExternalCallRecord::pending(request);
                        record.status = CallStatus::TimedOut;
                        record
                    }
                }
            }
            InFlight::Skipped(request) => {
                let mut record = ExternalCallRecord::pending(request);
                record.status = CallStatus::TimedOut;
                record
            }
        }
    }
}
