//! Notification Hub Tests
//!
//! Fan-out ordering, per-client drop policy, eviction of disconnected
//! clients and membership changes while broadcasts are in flight.

use safescan::hub::{HubConfig, HubEvent, HubHandle, NotificationHub};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_pending, assert_ready_eq, task};

fn spawn_hub(client_buffer: usize) -> HubHandle {
    let (hub, handle) = NotificationHub::new(&HubConfig {
        client_buffer,
        command_buffer: 64,
    });
    tokio::spawn(hub.run());
    handle
}

#[tokio::test]
async fn test_every_client_sees_messages_in_order() {
    let hub = spawn_hub(32);
    let mut clients = Vec::new();
    for _ in 0..5 {
        clients.push(hub.register().await.unwrap());
    }

    for i in 0..10 {
        hub.broadcast(format!("msg-{i}")).await.unwrap();
    }

    for client in &mut clients {
        for i in 0..10 {
            assert_eq!(client.recv().await.as_deref(), Some(format!("msg-{i}").as_str()));
        }
    }

    let stats = hub.stats().await.unwrap();
    assert_eq!(stats.broadcasts, 10);
    assert_eq!(stats.delivered, 50);
    assert_eq!(stats.dropped, 0);
}

#[tokio::test]
async fn test_nothing_pending_before_broadcast() {
    let hub = spawn_hub(4);
    let mut sub = hub.register().await.unwrap();

    {
        let mut recv = task::spawn(sub.recv());
        assert_pending!(recv.poll());
    }

    hub.broadcast("ready").await.unwrap();
    // Round-trip through the actor so the broadcast has been fanned out.
    hub.client_count().await.unwrap();

    let mut recv = task::spawn(sub.recv());
    assert_ready_eq!(recv.poll(), Some(Arc::<str>::from("ready")));
}

#[tokio::test]
async fn test_slow_client_drops_only_its_own_messages() {
    let hub = spawn_hub(2);
    let mut fast = hub.register().await.unwrap();
    let mut slow = hub.register().await.unwrap();

    for i in 0..5 {
        hub.broadcast(format!("{i}")).await.unwrap();
        assert_eq!(fast.recv().await.as_deref(), Some(format!("{i}").as_str()));
    }

    // The slow client kept the first two and lost the rest.
    assert_eq!(slow.try_recv().as_deref(), Some("0"));
    assert_eq!(slow.try_recv().as_deref(), Some("1"));
    assert!(slow.try_recv().is_none());

    let stats = hub.stats().await.unwrap();
    assert_eq!(stats.dropped, 3);
    assert_eq!(stats.clients, 2, "a full buffer does not evict");
}

#[tokio::test]
async fn test_disconnected_client_evicted() {
    let hub = spawn_hub(4);
    let mut stays = hub.register().await.unwrap();
    let leaves = hub.register().await.unwrap();
    drop(leaves);

    hub.publish(&HubEvent::in_progress("ab".repeat(32))).await;
    let message = stays.recv().await.unwrap();
    assert!(message.contains("\"event\":\"in_progress\""));

    let stats = hub.stats().await.unwrap();
    assert_eq!(stats.clients, 1);
    assert_eq!(stats.evicted, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unregister_during_broadcast_burst() {
    let hub = spawn_hub(256);
    let mut steady = hub.register().await.unwrap();
    let leaving = hub.register().await.unwrap();

    let sender = hub.clone();
    let burst = tokio::spawn(async move {
        for i in 0..100 {
            sender.broadcast(format!("{i}")).await.unwrap();
        }
    });

    tokio::time::sleep(Duration::from_millis(1)).await;
    hub.unregister(leaving.id).await;
    burst.await.unwrap();

    for i in 0..100 {
        assert_eq!(steady.recv().await.as_deref(), Some(format!("{i}").as_str()));
    }
    assert_eq!(hub.client_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_handle_reports_closed_hub() {
    let (hub, handle) = NotificationHub::new(&HubConfig::default());
    drop(hub);

    assert!(handle.register().await.is_err());
    assert!(handle.broadcast("x").await.is_err());
    assert!(handle.stats().await.is_err());
    // Publishing to a stopped hub is logged, not fatal.
    handle.publish(&HubEvent::ack_delete("cd".repeat(32))).await;
}
