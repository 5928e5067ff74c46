//! Census frames → EventSource → in-memory queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use alertrelay_core::dedup::RecentKeys;
use alertrelay_core::filter::EventFilter;
use alertrelay_core::queue::DurableQueue;
use alertrelay_queue::{InMemoryQueue, QueuePublisher};
use alertrelay_stream::{census, to_signal, EventSource, SourceConfig};

const FRAMES: &[&str] = &[
    r#"{"send this for help":{"service":"event","action":"help"}}"#,
    r#"{"connected":"true","service":"push","type":"connectionStateChanged"}"#,
    r#"{"subscription":{"characterCount":0,"eventNames":["MetagameEvent"],"logicalAndCharactersWithWorlds":true,"worlds":["1","10","13","17","40"]}}"#,
    r#"{"online":{"EventServerEndpoint_Connery_1":"true"},"service":"event","type":"heartbeat"}"#,
    r#"{"payload":{"event_name":"MetagameEvent","experience_bonus":"25.000000","instance_id":"31122","metagame_event_id":"211","metagame_event_state":"135","metagame_event_state_name":"started","timestamp":"1700000000","world_id":"1","zone_id":"2"},"service":"event","type":"serviceMessage"}"#,
    r#"{"payload":{"event_name":"MetagameEvent","instance_id":"31123","metagame_event_state_name":"ended","world_id":"1","zone_id":"2"},"service":"event","type":"serviceMessage"}"#,
    r#"{"payload":{"event_name":"MetagameEvent","instance_id":"31124","metagame_event_state_name":"started","world_id":"17","zone_id":"344"},"service":"event","type":"serviceMessage"}"#,
    r#"{"payload":{"event_name":"MetagameEvent","instance_id":"31125","metagame_event_state_name":"started","world_id":"40","zone_id":"8"},"service":"event","type":"serviceMessage"}"#,
    // Redelivered by the upstream after a resubscribe.
    r#"{"payload":{"event_name":"MetagameEvent","instance_id":"31125","metagame_event_state_name":"started","world_id":"40","zone_id":"8"},"service":"event","type":"serviceMessage"}"#,
];

#[tokio::test]
async fn started_alerts_on_relay_zones_reach_the_queue() {
    let queue = Arc::new(InMemoryQueue::named("MetagameEvent"));
    let source = EventSource::new(
        EventFilter::default(),
        Arc::new(QueuePublisher::new(queue.clone())),
        SourceConfig { resubscribe_interval: Duration::from_secs(3600) },
    );

    let (sig_tx, sig_rx) = mpsc::unbounded_channel();
    let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
    let mut seen = RecentKeys::new(64);
    for frame in FRAMES {
        if let Some(signal) = to_signal(census::classify(frame), &mut seen) {
            sig_tx.send(signal).unwrap();
        }
    }
    drop(sig_tx);
    let _ = source.run(sig_rx, cmd_tx, std::future::pending()).await;

    let metrics = source.metrics();
    assert_eq!(metrics.events_received, 4);
    assert_eq!(metrics.events_relayed, 2);
    assert_eq!(metrics.heartbeats, 1);
    assert_eq!(metrics.duplicates, 1);
    assert_eq!(metrics.warnings, 0);

    let first = queue.receive().await.unwrap().unwrap();
    let decoded = first.decode().unwrap();
    assert_eq!(decoded.instance_id, "31122");
    assert_eq!(decoded.world_id.as_str(), "1");
    assert_eq!(decoded.zone_id.as_str(), "2");
    assert_eq!(decoded.raw["metagame_event_id"], "211");

    let second = queue.receive().await.unwrap().unwrap().decode().unwrap();
    assert_eq!(second.instance_id, "31125");
    assert_eq!(queue.ready_len(), 0);
}
