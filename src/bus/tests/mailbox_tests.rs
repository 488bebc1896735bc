//! Mailbox ordering, backpressure, and suspension tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::domain::AgentId;
use crate::bus::domain::{
    BusError, CorrelationId, Delivery, MessagePayload, Recipient, SendRequest, Sender,
    SequenceNumber,
};
use crate::bus::services::MessageBus;
use crate::cancel::CancellationToken;
use crate::config::BusSettings;
use mockable::DefaultClock;
use rstest::{fixture, rstest};
use serde_json::json;

type TestBus = MessageBus<DefaultClock>;

fn bus_with(settings: &BusSettings) -> Arc<TestBus> {
    Arc::new(MessageBus::new(settings, Arc::new(DefaultClock)))
}

#[fixture]
fn bus() -> Arc<TestBus> {
    bus_with(&BusSettings::default())
}

fn data(to: AgentId, value: u64) -> SendRequest {
    SendRequest::new(Recipient::Agent(to), MessagePayload::data(json!(value)))
}

fn open(bus: &TestBus) -> AgentId {
    let agent = AgentId::new();
    bus.open_mailbox(agent).expect("open mailbox");
    agent
}

#[rstest]
fn send_assigns_increasing_sequence_numbers(bus: Arc<TestBus>) {
    let agent = open(&bus);

    let first = bus.send(data(agent, 1)).expect("send");
    let second = bus.send(data(agent, 2)).expect("send");

    let sequences: Vec<_> = [first, second]
        .iter()
        .filter_map(Delivery::receipt)
        .map(|receipt| receipt.sequence)
        .collect();
    assert_eq!(sequences, vec![SequenceNumber::new(1), SequenceNumber::new(2)]);
}

#[rstest]
fn sender_and_correlation_are_preserved(bus: Arc<TestBus>) {
    let from = open(&bus);
    let to = open(&bus);
    let correlation = CorrelationId::new();

    bus.send(data(to, 7).from_agent(from).with_correlation(correlation))
        .expect("send");
    let message = bus
        .try_receive(to)
        .expect("mailbox")
        .expect("queued message");

    assert_eq!(message.sender, Sender::Agent(from));
    assert_eq!(message.correlation_id, Some(correlation));
    assert!(!message.broadcast);
}

#[rstest]
fn unknown_recipient_is_rejected(bus: Arc<TestBus>) {
    let stranger = AgentId::new();
    assert_eq!(
        bus.send(data(stranger, 1)),
        Err(BusError::UnknownRecipient(stranger))
    );
}

#[rstest]
fn high_water_mark_fails_instead_of_blocking() {
    let bus = bus_with(&BusSettings {
        mailbox_high_water_mark: Some(2),
        ..BusSettings::default()
    });
    let agent = open(&bus);
    bus.send(data(agent, 1)).expect("first fits");
    bus.send(data(agent, 2)).expect("second fits");

    let overflow = bus.send(data(agent, 3));

    assert_eq!(
        overflow,
        Err(BusError::MailboxOverflow {
            agent_id: agent,
            limit: 2
        })
    );
    assert_eq!(bus.pending(agent), Ok(2));
}

#[rstest]
fn broadcast_reaches_only_open_mailboxes() {
    let bus = bus_with(&BusSettings {
        mailbox_high_water_mark: Some(1),
        ..BusSettings::default()
    });
    let roomy = open(&bus);
    let full = open(&bus);
    bus.send(data(full, 0)).expect("fill mailbox");
    let closed = open(&bus);
    bus.close_mailbox(closed).expect("close");

    let delivery = bus
        .send(SendRequest::new(Recipient::Broadcast, MessagePayload::Shutdown))
        .expect("broadcast");
    let late = open(&bus);

    let Delivery::Broadcast(report) = delivery else {
        panic!("broadcast should produce a report");
    };
    let delivered: Vec<AgentId> = report.delivered.iter().map(|r| r.recipient).collect();
    assert_eq!(delivered, vec![roomy]);
    assert_eq!(report.overflowed, vec![full]);
    assert_eq!(bus.pending(late), Ok(0));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn receive_preserves_fifo_under_concurrent_senders(bus: Arc<TestBus>) {
    const SENDERS: u64 = 8;
    const PER_SENDER: u64 = 50;
    let agent = open(&bus);

    let mut handles = Vec::new();
    for sender in 0..SENDERS {
        let sender_bus = Arc::clone(&bus);
        handles.push(tokio::spawn(async move {
            for index in 0..PER_SENDER {
                let request = SendRequest::new(
                    Recipient::Agent(agent),
                    MessagePayload::data(json!({ "sender": sender, "index": index })),
                );
                sender_bus.send(request).expect("send");
            }
        }));
    }
    for handle in handles {
        handle.await.expect("sender task");
    }

    let token = CancellationToken::new();
    let mut last_sequence = 0;
    let mut last_per_sender: HashMap<u64, u64> = HashMap::new();
    for _ in 0..SENDERS * PER_SENDER {
        let message = bus.receive(agent, &token).await.expect("receive");
        assert!(message.sequence.value() > last_sequence);
        last_sequence = message.sequence.value();

        let MessagePayload::Data { body } = message.payload else {
            panic!("unexpected payload");
        };
        let sender = body.get("sender").and_then(serde_json::Value::as_u64).expect("sender id");
        let index = body.get("index").and_then(serde_json::Value::as_u64).expect("message index");
        if let Some(previous) = last_per_sender.insert(sender, index) {
            assert!(previous < index, "sender {sender} reordered");
        }
    }
    assert_eq!(bus.pending(agent), Ok(0));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn receive_suspends_until_message_arrives(bus: Arc<TestBus>) {
    let agent = open(&bus);
    let receiver_bus = Arc::clone(&bus);
    let waiter = tokio::spawn(async move {
        receiver_bus
            .receive(agent, &CancellationToken::new())
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());
    bus.send(data(agent, 42)).expect("send");

    let message = waiter.await.expect("join").expect("receive");
    assert_eq!(message.payload, MessagePayload::data(json!(42)));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn cancelled_receive_consumes_nothing(bus: Arc<TestBus>) {
    let agent = open(&bus);
    let token = CancellationToken::new();
    token.cancel();

    let result = bus.receive(agent, &token).await;
    bus.send(data(agent, 1)).expect("send");

    assert_eq!(result.map(|message| message.id), Err(BusError::Cancelled(agent)));
    assert_eq!(bus.pending(agent), Ok(1));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn closing_mailbox_wakes_waiting_receiver(bus: Arc<TestBus>) {
    let agent = open(&bus);
    let receiver_bus = Arc::clone(&bus);
    let waiter = tokio::spawn(async move {
        receiver_bus
            .receive(agent, &CancellationToken::new())
            .await
            .map(|message| message.id)
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    bus.close_mailbox(agent).expect("close");

    let result = waiter.await.expect("join");
    assert_eq!(result, Err(BusError::MailboxClosed(agent)));
}
