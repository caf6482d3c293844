#![allow(dead_code)]

use sofa::{ChangeEvent, ChangesFeed, Client, Database, FeedConfig, ReconnectPolicy};
use sofa_memory::MemoryServer;
use std::collections::BTreeSet;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(5);

/// Feed settings that reconnect quickly
pub fn fast_feed() -> FeedConfig {
    FeedConfig::default()
        .with_channel_capacity(4)
        .with_heartbeat(None)
        .with_reconnect(
            ReconnectPolicy::default()
                .with_initial_delay(Duration::from_millis(10))
                .with_max_delay(Duration::from_millis(50)),
        )
}

pub async fn setup(name: &str) -> (MemoryServer, Database) {
    let server = MemoryServer::new();
    let client = Client::with_transport(server.clone()).with_feed_config(fast_feed());
    let db = client.create_database(name).await.unwrap();
    (server, db)
}

pub async fn next_event(feed: &mut ChangesFeed) -> ChangeEvent {
    tokio::time::timeout(WAIT, feed.next())
        .await
        .expect("timed out waiting for a change")
        .expect("feed ended")
        .expect("feed failed")
}

/// Read events until every id in `expected` has been seen
pub async fn collect_ids(feed: &mut ChangesFeed, expected: &BTreeSet<String>) -> Vec<ChangeEvent> {
    let mut seen = BTreeSet::new();
    let mut events = Vec::new();
    while !expected.is_subset(&seen) {
        let event = next_event(feed).await;
        seen.insert(event.id.clone());
        events.push(event);
    }
    events
}
