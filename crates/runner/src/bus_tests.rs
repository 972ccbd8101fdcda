use chrono::Utc;
use uuid::Uuid;

use crate::{
    bus::{SUBSCRIBER_CHANNEL_CAPACITY, SubscriptionBus},
    event::{Event, EventPayload},
};

fn event(task_id: Uuid, event_id: i64) -> Event {
    Event {
        event_id,
        task_id,
        timestamp: Utc::now(),
        stage_name: None,
        body: EventPayload::log(format!("event {event_id}")),
    }
}

#[tokio::test]
async fn fan_out_delivers_to_every_subscriber() {
    let bus = SubscriptionBus::new();
    let task_id = Uuid::new_v4();
    let mut a = bus.subscribe(task_id);
    let mut b = bus.subscribe(task_id);

    bus.publish(&event(task_id, 1));

    assert_eq!(a.recv().await.unwrap().event_id, 1);
    assert_eq!(b.recv().await.unwrap().event_id, 1);
}

#[tokio::test]
async fn events_are_scoped_to_their_task() {
    let bus = SubscriptionBus::new();
    let task_a = Uuid::new_v4();
    let task_b = Uuid::new_v4();
    let mut rx = bus.subscribe(task_a);

    bus.publish(&event(task_b, 1));
    bus.publish(&event(task_a, 1));

    let received = rx.recv().await.unwrap();
    assert_eq!(received.task_id, task_a);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn full_channel_drops_events_without_deregistering() {
    let bus = SubscriptionBus::new();
    let task_id = Uuid::new_v4();
    let mut rx = bus.subscribe(task_id);

    // One more than fits: the overflow event is dropped for this subscriber.
    for event_id in 1..=(SUBSCRIBER_CHANNEL_CAPACITY as i64 + 1) {
        bus.publish(&event(task_id, event_id));
    }
    assert_eq!(bus.subscriber_count(task_id), 1);

    let mut received = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        received.push(ev.event_id);
    }
    assert_eq!(received.len(), SUBSCRIBER_CHANNEL_CAPACITY);
    assert_eq!(*received.last().unwrap(), SUBSCRIBER_CHANNEL_CAPACITY as i64);

    // The subscriber is still registered and sees later events.
    let next_id = SUBSCRIBER_CHANNEL_CAPACITY as i64 + 2;
    bus.publish(&event(task_id, next_id));
    assert_eq!(rx.recv().await.unwrap().event_id, next_id);
}

#[tokio::test]
async fn closed_channels_are_swept_on_publish() {
    let bus = SubscriptionBus::new();
    let task_id = Uuid::new_v4();
    let rx = bus.subscribe(task_id);
    drop(rx);

    assert_eq!(bus.subscriber_count(task_id), 1);
    bus.publish(&event(task_id, 1));
    assert_eq!(bus.subscriber_count(task_id), 0);
}

#[tokio::test]
async fn remove_task_closes_subscribers_after_drain() {
    let bus = SubscriptionBus::new();
    let task_id = Uuid::new_v4();
    let mut rx = bus.subscribe(task_id);

    bus.publish(&event(task_id, 1));
    bus.remove_task(task_id);

    // Buffered events still arrive, then the channel closes.
    assert_eq!(rx.recv().await.unwrap().event_id, 1);
    assert!(rx.recv().await.is_none());
}

#[test]
fn publish_without_subscribers_is_a_noop() {
    let bus = SubscriptionBus::new();
    let task_id = Uuid::new_v4();
    bus.publish(&event(task_id, 1));
    assert_eq!(bus.subscriber_count(task_id), 0);
}
