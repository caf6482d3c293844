//! Changes Feed Example
//!
//! Follows a continuous changes feed while a writer inserts documents, and
//! keeps delivering across a dropped connection.
//!
//! Run with: cargo run --example follow

use std::time::Duration;

use futures_util::StreamExt;
use sofa::{ChangesSubscription, Client, Document, FeedConfig, FilterRef, ReconnectPolicy};
use sofa_memory::MemoryServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let server = MemoryServer::new();
    server.register_filter("events", "app", "important", |doc, _| {
        doc.get("level").and_then(|v| v.as_str()) == Some("high")
    });

    let feed_config = FeedConfig::default().with_reconnect(
        ReconnectPolicy::default()
            .with_initial_delay(Duration::from_millis(50))
            .with_max_delay(Duration::from_secs(2)),
    );
    let client = Client::with_transport(server.clone()).with_feed_config(feed_config);
    let db = client.create_database("events").await?;

    let feed = db.changes_feed(
        ChangesSubscription::continuous()
            .filter(FilterRef::new("app", "important"))
            .include_docs(true),
    );

    let writer = {
        let db = db.clone();
        let server = server.clone();
        tokio::spawn(async move {
            for i in 0..10 {
                let level = if i % 3 == 0 { "high" } else { "low" };
                let doc = Document::with_id(format!("event-{:02}", i)).field("level", level);
                if let Err(e) = db.insert(doc).await {
                    eprintln!("insert failed: {}", e);
                }
                if i == 5 {
                    println!("-- dropping open connections --");
                    server.sever_streams();
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
    };

    // event-00, 03, 06 and 09 match the filter
    let mut feed = feed.take(4);
    while let Some(event) = feed.next().await {
        let event = event?;
        println!("{:>4} {}", event.seq, event.id);
    }

    writer.await?;
    let requests = server
        .requests()
        .iter()
        .filter(|r| r.path.ends_with("/_changes"))
        .count();
    println!("Changes requests sent: {}", requests);
    Ok(())
}
