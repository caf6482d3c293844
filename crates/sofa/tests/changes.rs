mod common;

use common::{collect_ids, fast_feed, next_event, setup, WAIT};
use sofa::{
    CancellationToken, ChangesSubscription, Client, Database, Document, Error, FeedState,
    FilterRef, ReconnectPolicy, Seq, TransportError,
};
use sofa_memory::{Fault, MemoryServer};
use std::collections::BTreeSet;
use std::time::Duration;

fn changes_requests(server: &MemoryServer) -> Vec<sofa_protocol::Request> {
    server
        .requests()
        .into_iter()
        .filter(|r| r.path.ends_with("/_changes"))
        .collect()
}

async fn insert_all(db: &Database, ids: &[String]) {
    for id in ids {
        db.insert(Document::with_id(id.as_str()).field("n", 1)).await.unwrap();
    }
}

fn ids(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{}-{:03}", prefix, i)).collect()
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_continuous_delivers_every_inserted_id() {
    let server = MemoryServer::new().with_chunk_size(7);
    let client = Client::with_transport(server.clone()).with_feed_config(fast_feed());
    let db = client.create_database("feed").await.unwrap();

    let mut feed = db.changes_feed(ChangesSubscription::continuous());
    let expected = ids("doc", 25);

    let writer = {
        let db = db.clone();
        let expected = expected.clone();
        tokio::spawn(async move { insert_all(&db, &expected).await })
    };

    let want: BTreeSet<String> = expected.iter().cloned().collect();
    let events = collect_ids(&mut feed, &want).await;
    writer.await.unwrap();

    let seen: BTreeSet<String> = events.iter().map(|e| e.id.clone()).collect();
    assert_eq!(seen, want);

    let positions: Vec<u64> = events.iter().filter_map(|e| e.seq.position()).collect();
    assert!(positions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(feed.state(), FeedState::Delivering);
    assert_eq!(feed.last_seq(), Some(&events[events.len() - 1].seq));
}

#[tokio::test]
async fn test_reconnects_after_forced_disconnect_without_gap() {
    let (server, db) = setup("feed").await;
    let mut feed = db.changes_feed(ChangesSubscription::continuous());

    let first = ids("before", 5);
    insert_all(&db, &first).await;
    let events = collect_ids(&mut feed, &first.iter().cloned().collect()).await;
    let last_delivered = events[events.len() - 1].seq.position().unwrap();

    server.sever_streams();

    let second = ids("after", 5);
    insert_all(&db, &second).await;
    let events = collect_ids(&mut feed, &second.iter().cloned().collect()).await;
    assert!(events.iter().all(|e| e.id.starts_with("after") || e.id.starts_with("before")));

    let requests = changes_requests(&server);
    assert!(requests.len() >= 2);
    let resumed: u64 = Seq::from(requests[1].params.get("since").unwrap())
        .position()
        .unwrap();
    assert!(resumed <= last_delivered);
}

#[tokio::test]
async fn test_resume_sends_opaque_seq_verbatim() {
    let server = MemoryServer::new().with_opaque_seqs();
    let client = Client::with_transport(server.clone()).with_feed_config(fast_feed());
    let db = client.create_database("feed").await.unwrap();

    let mut feed = db.changes_feed(ChangesSubscription::continuous());
    db.insert(Document::with_id("a")).await.unwrap();
    let event = next_event(&mut feed).await;
    assert!(matches!(event.seq, Seq::Opaque(_)));

    server.sever_streams();
    db.insert(Document::with_id("b")).await.unwrap();
    let event_b = next_event(&mut feed).await;
    assert_eq!(event_b.id, "b");

    let requests = changes_requests(&server);
    assert_eq!(requests[1].params.get("since"), Some(event.seq.to_string().as_str()));
}

#[tokio::test]
async fn test_server_filter_applies() {
    let (server, db) = setup("feed").await;
    server.register_filter("feed", "app", "foo", |doc, _| {
        doc.get("name").and_then(|v| v.as_str()) == Some("foo")
    });

    let mut feed = db.changes_feed(
        ChangesSubscription::continuous().filter(FilterRef::new("app", "foo")),
    );

    for i in 0..6 {
        let name = if i % 2 == 0 { "foo" } else { "bar" };
        db.insert(Document::with_id(format!("{}-{}", name, i)).field("name", name))
            .await
            .unwrap();
    }
    db.insert(Document::with_id("foo-last").field("name", "foo"))
        .await
        .unwrap();

    let mut seen = Vec::new();
    loop {
        let event = next_event(&mut feed).await;
        seen.push(event.id.clone());
        if event.id == "foo-last" {
            break;
        }
    }
    assert!(seen.iter().all(|id| id.starts_with("foo-")));
    assert_eq!(seen.len(), 4);

    let request = &changes_requests(&server)[0];
    assert_eq!(request.params.get("filter"), Some("app/foo"));
}

#[tokio::test]
async fn test_missing_filter_closes_feed_with_error() {
    let (server, db) = setup("feed").await;
    let mut feed = db.changes_feed(
        ChangesSubscription::continuous().filter(FilterRef::new("app", "nope")),
    );

    let item = tokio::time::timeout(WAIT, feed.next()).await.unwrap();
    let err = item.unwrap().unwrap_err();
    assert!(err.is_not_found());
    assert!(!err.is_retryable());

    assert!(tokio::time::timeout(WAIT, feed.next()).await.unwrap().is_none());
    assert_eq!(feed.state(), FeedState::Closed);
    assert_eq!(changes_requests(&server).len(), 1);
}

#[tokio::test]
async fn test_retryable_failures_are_absorbed() {
    let (server, db) = setup("feed").await;
    db.insert(Document::with_id("a")).await.unwrap();

    server.inject(Fault::Status(503), 2);
    server.inject(Fault::Refuse, 1);
    let mut feed = db.changes_feed(ChangesSubscription::continuous());

    let event = next_event(&mut feed).await;
    assert_eq!(event.id, "a");
    assert_eq!(changes_requests(&server).len(), 4);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let (server, db) = setup("feed").await;
    server.inject(Fault::Refuse, 10);

    let config = fast_feed().with_reconnect(
        ReconnectPolicy::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_attempts(Some(2)),
    );
    let mut feed = db.changes_feed_with(ChangesSubscription::continuous(), config);

    let err = tokio::time::timeout(WAIT, feed.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, sofa::Error::Transport(_)));
    assert!(tokio::time::timeout(WAIT, feed.next()).await.unwrap().is_none());
    assert_eq!(feed.state(), FeedState::Closed);
    assert_eq!(changes_requests(&server).len(), 3);
}

#[tokio::test]
async fn test_idle_connection_is_reopened() {
    let (server, db) = setup("feed").await;
    let config = fast_feed().with_idle_timeout(Some(Duration::from_millis(100)));
    let _feed = db.changes_feed_with(ChangesSubscription::continuous(), config);

    let server_ref = server.clone();
    wait_for(move || changes_requests(&server_ref).len() >= 3).await;
}

#[tokio::test]
async fn test_heartbeats_keep_connection_alive() {
    let (server, db) = setup("feed").await;
    let config = fast_feed()
        .with_heartbeat(Some(Duration::from_millis(20)))
        .with_idle_timeout(Some(Duration::from_millis(300)));
    let mut feed = db.changes_feed_with(ChangesSubscription::continuous(), config);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(changes_requests(&server).len(), 1);
    assert_eq!(
        changes_requests(&server)[0].params.get("heartbeat"),
        Some("20")
    );

    db.insert(Document::with_id("late")).await.unwrap();
    assert_eq!(next_event(&mut feed).await.id, "late");
}

#[tokio::test]
async fn test_server_timeout_reconnects_silently() {
    let (server, db) = setup("feed").await;
    let mut feed = db.changes_feed(
        ChangesSubscription::continuous().timeout(Duration::from_millis(50)),
    );

    let server_ref = server.clone();
    wait_for(move || changes_requests(&server_ref).len() >= 2).await;

    db.insert(Document::with_id("x")).await.unwrap();
    assert_eq!(next_event(&mut feed).await.id, "x");
    assert_ne!(feed.state(), FeedState::Closed);
}

#[tokio::test]
async fn test_cancel_stops_delivery_and_releases_stream() {
    let (server, db) = setup("feed").await;
    insert_all(&db, &ids("doc", 10)).await;

    let mut feed = db.changes_feed(ChangesSubscription::continuous());
    next_event(&mut feed).await;
    let server_ref = server.clone();
    wait_for(move || server_ref.active_streams() == 1).await;

    feed.cancel();
    assert_eq!(feed.state(), FeedState::Closed);
    assert!(feed.is_cancelled());
    // Buffered events are not handed out after cancellation
    assert!(feed.next().await.is_none());

    feed.close().await;
    let server_ref = server.clone();
    wait_for(move || server_ref.active_streams() == 0).await;
}

#[tokio::test]
async fn test_dropping_feed_releases_stream() {
    let (server, db) = setup("feed").await;
    let mut feed = db.changes_feed(ChangesSubscription::continuous());
    db.insert(Document::with_id("a")).await.unwrap();
    next_event(&mut feed).await;

    drop(feed);
    let server_ref = server.clone();
    wait_for(move || server_ref.active_streams() == 0).await;
}

#[tokio::test]
async fn test_state_transitions_are_observable() {
    let (server, db) = setup("feed").await;
    let feed = db.changes_feed(ChangesSubscription::continuous());
    let mut states = feed.state_changes();

    tokio::time::timeout(WAIT, states.wait_for(|s| *s == FeedState::Delivering))
        .await
        .unwrap()
        .unwrap();

    server.sever_streams();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == FeedState::Reconnecting))
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == FeedState::Delivering))
        .await
        .unwrap()
        .unwrap();

    feed.close().await;
    assert_eq!(*states.borrow(), FeedState::Closed);
}

#[tokio::test]
async fn test_normal_feed_delivers_once_and_closes() {
    let (_server, db) = setup("feed").await;
    insert_all(&db, &ids("doc", 3)).await;

    let mut feed = db.changes_feed(ChangesSubscription::normal().include_docs(true));
    let mut seen = Vec::new();
    while let Some(event) = tokio::time::timeout(WAIT, feed.next()).await.unwrap() {
        let event = event.unwrap();
        assert!(event.doc.is_some());
        seen.push(event.id);
    }
    assert_eq!(seen, ids("doc", 3));
    assert_eq!(feed.state(), FeedState::Closed);
}

#[tokio::test]
async fn test_single_shot_queries() {
    let (_server, db) = setup("feed").await;
    insert_all(&db, &ids("doc", 3)).await;

    let batch = db.changes(&ChangesSubscription::normal()).await.unwrap();
    assert_eq!(batch.results.len(), 3);
    assert_eq!(batch.last_seq, Seq::Number(3));

    let batch = db
        .changes(&ChangesSubscription::normal().since(2u64))
        .await
        .unwrap();
    assert_eq!(batch.results.len(), 1);
    assert_eq!(batch.results[0].id, "doc-002");

    // Long-poll with nothing new returns an empty batch at the timeout
    let batch = db
        .changes(
            &ChangesSubscription::long_poll()
                .since(Seq::now())
                .timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    assert!(batch.results.is_empty());
    assert_eq!(batch.last_seq, Seq::Number(3));
}

#[tokio::test]
async fn test_long_poll_waits_for_a_change() {
    let (_server, db) = setup("feed").await;
    db.insert(Document::with_id("old")).await.unwrap();

    let waiter = {
        let db = db.clone();
        tokio::spawn(async move {
            db.changes(&ChangesSubscription::long_poll().since(Seq::now()))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    db.insert(Document::with_id("new")).await.unwrap();

    let batch = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap().unwrap();
    assert_eq!(batch.results.len(), 1);
    assert_eq!(batch.results[0].id, "new");
}

#[tokio::test]
async fn test_deletions_are_flagged() {
    let (_server, db) = setup("feed").await;
    let written = db.insert(Document::with_id("gone")).await.unwrap();
    db.delete("gone", &written.rev).await.unwrap();

    let mut feed = db.changes_feed(ChangesSubscription::continuous());
    let event = next_event(&mut feed).await;
    assert_eq!(event.id, "gone");
    assert!(event.deleted);
    assert_eq!(event.latest_rev().map(|r| r.generation()), Some(2));
}

#[tokio::test]
async fn test_full_channel_stops_reading_the_stream() {
    let (server, db) = setup("feed").await;
    let expected = ids("doc", 40);
    insert_all(&db, &expected).await;

    let config = fast_feed().with_channel_capacity(1);
    let mut feed = db.changes_feed_with(ChangesSubscription::continuous(), config);

    wait_for(|| server.lines_streamed() > 0).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stalled = server.lines_streamed();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // One event in the channel, one waiting for room
    assert_eq!(server.lines_streamed(), stalled);
    assert!(stalled <= 3, "read {} lines with nobody consuming", stalled);

    let want: BTreeSet<String> = expected.iter().cloned().collect();
    let events = collect_ids(&mut feed, &want).await;
    assert_eq!(events.len(), expected.len());
    assert_eq!(server.lines_streamed(), expected.len());
}

#[tokio::test]
async fn test_cancelled_long_poll_returns_promptly() {
    let (_server, db) = setup("feed").await;
    db.insert(Document::with_id("old")).await.unwrap();

    let cancel = CancellationToken::new();
    let waiter = {
        let db = db.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let subscription = ChangesSubscription::long_poll()
                .since(Seq::now())
                .timeout(Duration::from_secs(30));
            db.changes_until(&subscription, &cancel).await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(!Error::Cancelled.is_retryable());
}

#[tokio::test]
async fn test_server_shutdown_closes_feed() {
    let (server, db) = setup("feed").await;
    db.insert(Document::with_id("a")).await.unwrap();

    let mut feed = db.changes_feed(ChangesSubscription::continuous());
    assert_eq!(next_event(&mut feed).await.id, "a");

    server.shutdown();

    let err = tokio::time::timeout(WAIT, feed.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Closed)));
    assert!(tokio::time::timeout(WAIT, feed.next()).await.unwrap().is_none());
    assert_eq!(feed.state(), FeedState::Closed);
}
