//! End-to-end support conversations against a SQLite store and scripted services.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;

use aftercare_adapters::{CallPolicy, OrderStatus, ScriptedServices, ServiceError, Transaction};
use aftercare_agent::{IntentLabel, SupportController, SupportError, TurnAction};
use aftercare_core::config::AftercareConfig;
use aftercare_core::types::{EscalationReason, ImageRef, MessageRole, RoutingState};
use aftercare_storage::{Database, SqliteSessionStore};

fn setup(config: AftercareConfig, services: ScriptedServices) -> (SupportController, Arc<ScriptedServices>) {
    let db = Arc::new(Database::in_memory().unwrap());
    let store = Arc::new(SqliteSessionStore::new(db));
    let services = Arc::new(services);
    let adapters = services.adapters(CallPolicy::from_config(&config.turn, &config.retry));
    let controller = SupportController::with_pattern_classifier(store, adapters, config);
    (controller, services)
}

fn photo() -> ImageRef {
    let encoded = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG fake shirt photo");
    ImageRef(format!("data:image/png;base64,{}", encoded))
}

fn declined() -> Result<Transaction, ServiceError> {
    Ok(Transaction {
        transaction_id: "RF-X".into(),
        status: "declined".into(),
        order_status: None,
    })
}

#[tokio::test]
async fn track_order_reports_eta() {
    let (controller, services) = setup(AftercareConfig::default(), ScriptedServices::demo());
    let session = controller.create_session().unwrap();

    let reply = controller
        .handle_turn(session.id, "Where is my order #123", None)
        .await
        .unwrap();

    assert!(reply.reply.contains("2 days"), "reply: {}", reply.reply);
    assert!(reply.reply.contains("in transit"));
    assert!(!reply.escalated);
    assert!(reply.actions.is_empty());
    assert_eq!(services.order_lookup_count(), 1);

    let stored = controller.get_session(session.id).unwrap();
    assert_eq!(stored.messages.len(), 2);
    assert_eq!(stored.messages[0].role, MessageRole::Customer);
    assert_eq!(stored.messages[1].role, MessageRole::Agent);
    assert_eq!(stored.messages[1].text, reply.reply);
}

#[tokio::test]
async fn damaged_item_with_photo_is_refunded() {
    let (controller, services) = setup(AftercareConfig::default(), ScriptedServices::demo());
    let session = controller
        .create_session_for_order(Some("123".into()))
        .unwrap();

    let reply = controller
        .handle_turn(session.id, "This shirt arrived torn", Some(photo()))
        .await
        .unwrap();

    assert_eq!(reply.intent.unwrap().label, IntentLabel::ReportDefect);
    assert_eq!(services.refund_count(), 1);
    assert_eq!(reply.actions.len(), 1);
    match &reply.actions[0] {
        TurnAction::RefundIssued {
            order_id, amount, ..
        } => {
            assert_eq!(order_id, "123");
            assert_eq!(*amount, Some(39.99));
        }
        other => panic!("unexpected action {:?}", other),
    }
    assert!(reply.reply.contains("refund"), "reply: {}", reply.reply);
    assert!(reply.reply.contains("tear"));
    // One status line for the order even though two handlers reported on it.
    assert_eq!(reply.reply.matches("Order #123 status").count(), 1);
    assert!(!reply.reply.contains("Your order #123 is"));

    let stored = controller.get_session(session.id).unwrap();
    assert_eq!(stored.facts.last_defect.as_deref(), Some("tear"));
    assert_eq!(stored.failed_resolution_attempts, 0);
}

#[tokio::test]
async fn defect_without_photo_asks_for_one() {
    let (controller, services) = setup(AftercareConfig::default(), ScriptedServices::demo());
    let session = controller.create_session().unwrap();

    let reply = controller
        .handle_turn(session.id, "My mug arrived cracked", None)
        .await
        .unwrap();

    assert!(reply.reply.contains("photo"));
    assert_eq!(services.refund_count(), 0);
}

#[tokio::test]
async fn repeated_refund_failures_escalate_once() {
    let mut config = AftercareConfig::default();
    config.escalation.max_failed_resolutions = Some(2);
    let (controller, services) = setup(config, ScriptedServices::demo());
    for _ in 0..3 {
        services.push_refund(declined());
    }
    let session = controller
        .create_session_for_order(Some("123".into()))
        .unwrap();

    for attempt in 1..=2 {
        let reply = controller
            .handle_turn(session.id, "I want a refund", None)
            .await
            .unwrap();
        assert!(!reply.escalated, "escalated early on attempt {}", attempt);
        let stored = controller.get_session(session.id).unwrap();
        assert_eq!(stored.failed_resolution_attempts, attempt);
    }

    let reply = controller
        .handle_turn(session.id, "I want a refund", None)
        .await
        .unwrap();
    assert!(reply.escalated);
    assert_eq!(
        reply.escalation_reason,
        Some(EscalationReason::RepeatedResolutionFailure)
    );
    assert_eq!(reply.routing_state, RoutingState::Escalated);
    assert_eq!(services.refund_count(), 3);

    let stored = controller.get_session(session.id).unwrap();
    assert!(stored.escalated);
    assert_eq!(stored.failed_resolution_attempts, 0);

    // No further automated resolution once a human owns the session.
    let reply = controller
        .handle_turn(session.id, "Please just refund me", None)
        .await
        .unwrap();
    assert!(reply.escalated);
    assert_eq!(services.refund_count(), 3);
}

#[tokio::test]
async fn successful_refund_resets_failures() {
    let mut config = AftercareConfig::default();
    config.escalation.max_failed_resolutions = Some(5);
    let (controller, services) = setup(config, ScriptedServices::demo());
    services.push_refund(declined());
    let session = controller
        .create_session_for_order(Some("123".into()))
        .unwrap();

    controller
        .handle_turn(session.id, "I want a refund", None)
        .await
        .unwrap();
    assert_eq!(
        controller.get_session(session.id).unwrap().failed_resolution_attempts,
        1
    );

    let reply = controller
        .handle_turn(session.id, "Try the refund again", None)
        .await
        .unwrap();
    assert_eq!(reply.actions.len(), 1);
    assert_eq!(
        controller.get_session(session.id).unwrap().failed_resolution_attempts,
        0
    );
}

#[tokio::test]
async fn refund_over_limit_goes_to_a_human() {
    let mut config = AftercareConfig::default();
    config.escalation.refund_auto_approve_limit = Some(100.0);
    let (controller, services) = setup(config, ScriptedServices::demo());
    let session = controller
        .create_session_for_order(Some("456".into()))
        .unwrap();

    let reply = controller
        .handle_turn(session.id, "I'd like my money back", None)
        .await
        .unwrap();

    assert!(reply.escalated);
    assert_eq!(reply.escalation_reason, Some(EscalationReason::ApprovalRequired));
    assert_eq!(services.refund_count(), 0);
}

#[tokio::test]
async fn refund_with_unknown_total_is_held_when_limit_set() {
    let mut config = AftercareConfig::default();
    config.escalation.refund_auto_approve_limit = Some(100.0);
    config.retry.max_retries = 0;
    let (controller, services) = setup(config, ScriptedServices::demo());
    services.push_order(Err(ServiceError::Transient("order service down".into())));
    let session = controller
        .create_session_for_order(Some("456".into()))
        .unwrap();

    let reply = controller
        .handle_turn(session.id, "I'd like my money back", None)
        .await
        .unwrap();

    assert_eq!(services.order_lookup_count(), 1);
    assert_eq!(services.refund_count(), 0);
    assert!(reply.actions.is_empty());
    assert!(reply.escalated);
    assert_eq!(reply.escalation_reason, Some(EscalationReason::ApprovalRequired));
}

#[tokio::test]
async fn keyword_handoff_keeps_status_but_not_offers() {
    let mut config = AftercareConfig::default();
    config.escalation.keywords = vec!["lawyer".into()];
    let services = ScriptedServices::demo().with_order(OrderStatus {
        order_id: "789".into(),
        status: "lost".into(),
        carrier: Some("DHL".into()),
        eta: None,
        total: Some(60.0),
        item: None,
    });
    let (controller, services) = setup(config, services);
    let session = controller.create_session().unwrap();

    let reply = controller
        .handle_turn(session.id, "Where is my order #789? My lawyer will hear about this", None)
        .await
        .unwrap();

    assert!(reply.escalated);
    assert_eq!(reply.escalation_reason, Some(EscalationReason::KeywordTrigger));
    assert_eq!(services.order_lookup_count(), 1);
    assert!(reply.reply.contains("appears to be lost"), "reply: {}", reply.reply);
    assert!(!reply.reply.contains("eligible"), "reply: {}", reply.reply);
    assert!(reply.actions.is_empty());
}

#[tokio::test]
async fn exchange_recommendation_then_confirmation() {
    let mut config = AftercareConfig::default();
    config.classifier.min_confidence = Some(0.5);
    let (controller, services) = setup(config, ScriptedServices::demo());
    let session = controller
        .create_session_for_order(Some("123".into()))
        .unwrap();

    let reply = controller
        .handle_turn(session.id, "Can I exchange this shirt?", None)
        .await
        .unwrap();
    assert!(reply.reply.contains("Classic Cotton Shirt (Blue)"), "reply: {}", reply.reply);
    assert_eq!(services.exchange_count(), 0);
    assert_eq!(
        controller
            .get_session(session.id)
            .unwrap()
            .facts
            .recommended_item
            .as_deref(),
        Some("sku-shirt-blue")
    );

    let reply = controller
        .handle_turn(session.id, "Yes please", None)
        .await
        .unwrap();
    assert_eq!(services.exchange_count(), 1);
    assert!(matches!(
        &reply.actions[..],
        [TurnAction::ExchangeCreated { new_item_id, .. }] if new_item_id == "sku-shirt-blue"
    ));
}

#[tokio::test]
async fn persistent_low_confidence_escalates() {
    let mut config = AftercareConfig::default();
    config.classifier.min_confidence = Some(0.5);
    config.escalation.low_confidence_turns = 2;
    let (controller, _) = setup(config, ScriptedServices::demo());
    let session = controller.create_session().unwrap();

    let first = controller
        .handle_turn(session.id, "hmm so yeah", None)
        .await
        .unwrap();
    assert!(!first.escalated);
    assert!(first.reply.contains("not sure I understood"));

    let second = controller
        .handle_turn(session.id, "the thing with the stuff", None)
        .await
        .unwrap();
    assert!(second.escalated);
    assert_eq!(
        second.escalation_reason,
        Some(EscalationReason::PersistentLowConfidence)
    );
}

#[tokio::test]
async fn turns_without_resolution_escalate_past_the_limit() {
    let mut config = AftercareConfig::default();
    config.escalation.max_turns_without_resolution = Some(2);
    let (controller, _) = setup(config, ScriptedServices::demo());
    let session = controller.create_session().unwrap();

    for _ in 0..2 {
        let reply = controller
            .handle_turn(session.id, "My mug arrived cracked", None)
            .await
            .unwrap();
        assert!(!reply.escalated);
    }
    assert_eq!(
        controller.get_session(session.id).unwrap().turns_without_resolution,
        2
    );

    // A resolved turn starts the count again.
    let reply = controller
        .handle_turn(session.id, "what is your return policy", None)
        .await
        .unwrap();
    assert!(!reply.escalated);
    assert!(reply.reply.contains("30 days"), "reply: {}", reply.reply);
    assert_eq!(
        controller.get_session(session.id).unwrap().turns_without_resolution,
        0
    );

    for _ in 0..2 {
        let reply = controller
            .handle_turn(session.id, "My mug arrived cracked", None)
            .await
            .unwrap();
        assert!(!reply.escalated);
    }
    let reply = controller
        .handle_turn(session.id, "My mug arrived cracked", None)
        .await
        .unwrap();
    assert!(reply.escalated);
    assert_eq!(reply.escalation_reason, Some(EscalationReason::TurnLimit));

    let stored = controller.get_session(session.id).unwrap();
    assert_eq!(stored.escalation_reason, Some(EscalationReason::TurnLimit));
    assert_eq!(stored.turns_without_resolution, 0);
}

#[tokio::test(start_paused = true)]
async fn slow_service_degrades_without_failing_the_turn() {
    let mut config = AftercareConfig::default();
    config.turn.turn_timeout_ms = 1000;
    config.turn.call_timeout_ms = 5000;
    let services = ScriptedServices::demo().with_delay("order", Duration::from_secs(30));
    let (controller, _) = setup(config, services);
    let session = controller.create_session().unwrap();

    let reply = controller
        .handle_turn(session.id, "Where is my order #123", None)
        .await
        .unwrap();

    assert!(reply.reply.contains("taking longer than usual"), "reply: {}", reply.reply);
    assert!(!reply.escalated);
    assert_eq!(
        controller.get_session(session.id).unwrap().routing_state,
        RoutingState::Idle
    );
}

#[tokio::test]
async fn concurrent_turns_on_one_session_are_serialized() {
    let (controller, _) = setup(AftercareConfig::default(), ScriptedServices::demo());
    let controller = Arc::new(controller);
    let session = controller.create_session().unwrap();

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let controller = controller.clone();
        tasks.push(tokio::spawn(async move {
            controller
                .handle_turn(session.id, "Where is my order #123", None)
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stored = controller.get_session(session.id).unwrap();
    assert_eq!(stored.messages.len(), 8);
    let roles: Vec<MessageRole> = stored.messages.iter().map(|m| m.role).collect();
    for pair in roles.chunks(2) {
        assert_eq!(pair, [MessageRole::Customer, MessageRole::Agent]);
    }
}

#[tokio::test]
async fn closed_session_rejects_turns() {
    let (controller, _) = setup(AftercareConfig::default(), ScriptedServices::demo());
    let session = controller.create_session().unwrap();
    controller.close_session(session.id).unwrap();

    let err = controller
        .handle_turn(session.id, "hello?", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SupportError::SessionClosed(_)));
    assert_eq!(controller.get_session(session.id).unwrap().messages.len(), 0);
}
