mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use common::*;
use notifier_core::{
    models::{
        BookingSnapshot, DeadLetterReason, OutcomeStatus, Payload, TaskEnvelope,
        BOOKING_CONFIRMATION_TASK,
    },
    traits::{Broker, TaskHandler},
};
use notifier_infrastructure::{ConsoleTransport, InMemoryBroker};
use notifier_worker::{builtin_handlers, message_id_for, Dispatcher, HandlerRegistry};

fn booking_envelope(max_attempts: u32) -> TaskEnvelope {
    let booking = BookingSnapshot {
        booking_id: 7,
        user_email: "guest@example.com".to_string(),
        listing_name: "Lake Cabin".to_string(),
        check_in: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        check_out: NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
        guests: Some(2),
    };
    TaskEnvelope::new(BOOKING_CONFIRMATION_TASK, booking.to_payload(), max_attempts)
}

fn email_dispatcher(broker: Arc<dyn Broker>, transport: Arc<ScriptedTransport>) -> Dispatcher {
    Dispatcher::new(broker, email_registry(transport), fast_settings())
}

#[tokio::test]
async fn test_successful_delivery_is_acked() {
    let memory = InMemoryBroker::new();
    let broker: Arc<dyn Broker> = Arc::new(memory.clone());
    let transport = ScriptedTransport::succeeding();
    let dispatcher = email_dispatcher(broker.clone(), transport.clone());

    let envelope = booking_envelope(3);
    broker.enqueue(QUEUE, &envelope).await.unwrap();

    let mut stream = broker.consume(QUEUE).await.unwrap();
    let outcome = dispatcher.process_delivery(next_delivery(&mut stream).await).await;

    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert_eq!(outcome.task_id, envelope.task_id());
    assert_eq!(outcome.attempt_count, 1);
    assert!(outcome.error.is_none());

    assert_eq!(memory.unacked_count(QUEUE).await, 0);
    assert_eq!(broker.queue_size(QUEUE).await.unwrap(), 0);
    assert!(broker.dead_letters(QUEUE).await.unwrap().is_empty());

    let sent = transport.delivered();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "guest@example.com");
    assert_eq!(sent[0].message_id, message_id_for(envelope.task_id()));
    assert!(sent[0].body.contains("Guests: 2"));
}

#[tokio::test]
async fn test_unknown_task_is_dead_lettered_without_invocation() {
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let known = CountingHandler::new("tests.known");
    let registry =
        HandlerRegistry::from_handlers([known.clone() as Arc<dyn TaskHandler>]).unwrap();
    let dispatcher = Dispatcher::new(broker.clone(), Arc::new(registry), fast_settings());

    let envelope = TaskEnvelope::new("tests.unknown", Payload::new().with("x", 1i64), 3);
    broker.enqueue(QUEUE, &envelope).await.unwrap();

    let mut stream = broker.consume(QUEUE).await.unwrap();
    let outcome = dispatcher.process_delivery(next_delivery(&mut stream).await).await;

    assert_eq!(outcome.status, OutcomeStatus::FailedPermanent);
    assert_eq!(outcome.attempt_count, 0);
    assert!(outcome.error.unwrap().contains("tests.unknown"));
    assert_eq!(known.calls(), 0);

    let dead = broker.dead_letters(QUEUE).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, DeadLetterReason::UnknownTask);
    assert_eq!(dead[0].task_id(), Some(envelope.task_id()));
    assert_eq!(dead[0].envelope.as_ref().unwrap().attempt_count(), 0);
}

#[tokio::test]
async fn test_permanent_failure_short_circuits_retries() {
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let transport = ScriptedTransport::always(Step::Permanent);
    let dispatcher = email_dispatcher(broker.clone(), transport.clone());

    broker.enqueue(QUEUE, &booking_envelope(5)).await.unwrap();

    let mut stream = broker.consume(QUEUE).await.unwrap();
    let outcome = dispatcher.process_delivery(next_delivery(&mut stream).await).await;

    assert_eq!(outcome.status, OutcomeStatus::FailedPermanent);
    assert_eq!(outcome.attempt_count, 1);
    assert_eq!(transport.attempts(), 1);

    let dead = broker.dead_letters(QUEUE).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, DeadLetterReason::PermanentFailure);
    assert!(dead[0].error.contains("550"));

    // 不会再次投递
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.queue_size(QUEUE).await.unwrap(), 0);
}

#[tokio::test]
async fn test_transient_failures_stop_after_max_attempts() {
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let transport = ScriptedTransport::always(Step::Transient);
    let dispatcher = email_dispatcher(broker.clone(), transport.clone());

    let envelope = booking_envelope(3);
    broker.enqueue(QUEUE, &envelope).await.unwrap();

    let mut stream = broker.consume(QUEUE).await.unwrap();
    let mut statuses = Vec::new();
    for _ in 0..3 {
        let delivery = next_delivery(&mut stream).await;
        assert_eq!(delivery.envelope.task_id(), envelope.task_id());
        statuses.push(dispatcher.process_delivery(delivery).await.status);
    }

    assert_eq!(
        statuses,
        vec![
            OutcomeStatus::FailedTransient,
            OutcomeStatus::FailedTransient,
            OutcomeStatus::FailedPermanent
        ]
    );
    assert_eq!(transport.attempts(), 3);

    let dead = broker.dead_letters(QUEUE).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, DeadLetterReason::RetriesExhausted);
    assert_eq!(dead[0].envelope.as_ref().unwrap().attempt_count(), 3);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.queue_size(QUEUE).await.unwrap(), 0);
    assert_eq!(transport.attempts(), 3);
}

#[tokio::test]
async fn test_timeout_is_retried() {
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let slow = SlowHandler::new("tests.slow", Duration::from_millis(500));
    let registry = HandlerRegistry::from_handlers([slow.clone() as Arc<dyn TaskHandler>]).unwrap();

    let mut settings = fast_settings();
    settings
        .timeout_overrides
        .insert("tests.slow".to_string(), Duration::from_millis(50));
    let dispatcher = Dispatcher::new(broker.clone(), Arc::new(registry), settings);

    let envelope = TaskEnvelope::new("tests.slow", Payload::new(), 3);
    broker.enqueue(QUEUE, &envelope).await.unwrap();

    let mut stream = broker.consume(QUEUE).await.unwrap();
    let outcome = dispatcher.process_delivery(next_delivery(&mut stream).await).await;

    assert_eq!(outcome.status, OutcomeStatus::FailedTransient);
    assert_eq!(slow.finished(), 0);
    assert_eq!(dispatcher.active_tasks(), 0);

    let retry = next_delivery(&mut stream).await;
    assert_eq!(retry.envelope.task_id(), envelope.task_id());
    assert_eq!(retry.envelope.attempt_count(), 1);
}

#[tokio::test]
async fn test_handler_panic_is_permanent() {
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let registry =
        HandlerRegistry::from_handlers([Arc::new(PanickingHandler) as Arc<dyn TaskHandler>])
            .unwrap();
    let dispatcher = Dispatcher::new(broker.clone(), Arc::new(registry), fast_settings());

    broker
        .enqueue(QUEUE, &TaskEnvelope::new("tests.panic", Payload::new(), 3))
        .await
        .unwrap();

    let mut stream = broker.consume(QUEUE).await.unwrap();
    let outcome = dispatcher.process_delivery(next_delivery(&mut stream).await).await;

    assert_eq!(outcome.status, OutcomeStatus::FailedPermanent);
    assert!(outcome.error.unwrap().contains("handler exploded"));

    let dead = broker.dead_letters(QUEUE).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, DeadLetterReason::PermanentFailure);
}

#[tokio::test]
async fn test_malformed_payload_is_permanent() {
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let transport = ScriptedTransport::succeeding();
    let dispatcher = email_dispatcher(broker.clone(), transport.clone());

    let envelope = TaskEnvelope::new(
        BOOKING_CONFIRMATION_TASK,
        Payload::new().with("booking_id", 1i64),
        5,
    );
    broker.enqueue(QUEUE, &envelope).await.unwrap();

    let mut stream = broker.consume(QUEUE).await.unwrap();
    let outcome = dispatcher.process_delivery(next_delivery(&mut stream).await).await;

    assert_eq!(outcome.status, OutcomeStatus::FailedPermanent);
    assert_eq!(outcome.attempt_count, 1);
    assert_eq!(transport.attempts(), 0);
}

#[tokio::test]
async fn test_redelivery_after_lost_ack_does_not_send_twice() {
    let memory = InMemoryBroker::new();
    let flaky = FlakyAckBroker::new(memory.clone(), 1);
    let broker: Arc<dyn Broker> = flaky;
    let console = Arc::new(ConsoleTransport::new("webmaster@localhost"));
    let registry = HandlerRegistry::from_handlers(builtin_handlers(console.clone())).unwrap();
    let dispatcher = Dispatcher::new(broker.clone(), Arc::new(registry), fast_settings());

    let envelope = booking_envelope(3);
    broker.enqueue(QUEUE, &envelope).await.unwrap();

    let mut stream = broker.consume(QUEUE).await.unwrap();
    let first = dispatcher.process_delivery(next_delivery(&mut stream).await).await;
    assert_eq!(first.status, OutcomeStatus::Succeeded);

    // ack丢失，消息仍未确认；连接恢复后代理重新投递
    assert_eq!(memory.unacked_count(QUEUE).await, 1);
    assert_eq!(memory.recover(QUEUE).await, 1);

    let redelivery = next_delivery(&mut stream).await;
    assert!(redelivery.handle.redelivered);
    assert_eq!(redelivery.envelope.task_id(), envelope.task_id());

    let second = dispatcher.process_delivery(redelivery).await;
    assert_eq!(second.status, OutcomeStatus::Succeeded);

    let outbox = console.outbox().await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].message_id, message_id_for(envelope.task_id()));
    assert_eq!(memory.unacked_count(QUEUE).await, 0);
    assert!(broker.dead_letters(QUEUE).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_consumer_crash_before_ack_redelivers() {
    let memory = InMemoryBroker::new();
    let broker: Arc<dyn Broker> = Arc::new(memory.clone());

    let envelope = booking_envelope(3);
    broker.enqueue(QUEUE, &envelope).await.unwrap();

    {
        let mut crashed = broker.consume(QUEUE).await.unwrap();
        let taken = next_delivery(&mut crashed).await;
        assert_eq!(taken.envelope.task_id(), envelope.task_id());
    }
    assert_eq!(memory.recover(QUEUE).await, 1);

    let transport = ScriptedTransport::succeeding();
    let dispatcher = email_dispatcher(broker.clone(), transport.clone());
    let mut stream = broker.consume(QUEUE).await.unwrap();
    let outcome = dispatcher.process_delivery(next_delivery(&mut stream).await).await;

    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert_eq!(outcome.attempt_count, 1);
    assert_eq!(transport.delivered().len(), 1);
}

#[tokio::test]
async fn test_undecodable_message_never_reaches_handlers() {
    let memory = InMemoryBroker::new();
    let broker: Arc<dyn Broker> = Arc::new(memory.clone());
    let transport = ScriptedTransport::succeeding();
    let dispatcher = email_dispatcher(broker.clone(), transport.clone());

    memory.publish_raw(QUEUE, b"{not json".to_vec()).await.unwrap();
    let envelope = booking_envelope(3);
    broker.enqueue(QUEUE, &envelope).await.unwrap();

    let mut stream = broker.consume(QUEUE).await.unwrap();
    let delivery = next_delivery(&mut stream).await;
    assert_eq!(delivery.envelope.task_id(), envelope.task_id());
    dispatcher.process_delivery(delivery).await;

    let dead = broker.dead_letters(QUEUE).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, DeadLetterReason::Undecodable);
    assert!(dead[0].envelope.is_none());
    assert_eq!(transport.attempts(), 1);
}
