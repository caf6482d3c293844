//! Basic Sofa Example
//!
//! Document, bulk and view operations against an in-process server.
//!
//! Run with: cargo run --example basic

use sofa::{BulkWriteOutcome, Client, Document, GetOptions, ViewParams};
use sofa_memory::{MemoryServer, Reduce};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("Sofa Basic Example\n");

    let server = MemoryServer::new();
    server.register_view(
        "basic",
        "people",
        "by_city",
        |doc| match doc.get("city") {
            Some(city) => vec![(city.clone(), 1i64.into())],
            None => Vec::new(),
        },
        Some(Reduce::Count),
    );

    let client = Client::with_transport(server);

    println!("=== Documents ===\n");
    documents_example(&client).await?;

    println!("\n=== Bulk Writes ===\n");
    bulk_example(&client).await?;

    println!("\n=== Views ===\n");
    view_example(&client).await?;

    Ok(())
}

async fn documents_example(client: &Client) -> Result<(), Box<dyn std::error::Error>> {
    let info = client.server_info().await?;
    println!("Server version: {}", info.version);

    let db = client.create_database("basic").await?;

    // Insert without an id: one is generated
    let written = db
        .insert(
            Document::new()
                .field("name", "Alice")
                .field("city", "Lisbon"),
        )
        .await?;
    println!("Inserted {} at {}", written.id, written.rev);

    // Update with the current revision
    let mut doc = db.get(&written.id).await?;
    doc.set("age", 30i64);
    let updated = db.save(&doc).await?;
    println!("Updated to {}", updated.rev);

    // A stale revision is rejected
    let stale = doc.clone().revision(written.rev.clone());
    match db.save(&stale).await {
        Err(e) if e.is_conflict() => println!("Stale write rejected: {}", e),
        other => println!("Unexpected: {:?}", other),
    }

    let info = db.info().await?;
    println!("{} holds {} document(s)", info.db_name, info.doc_count);
    Ok(())
}

async fn bulk_example(client: &Client) -> Result<(), Box<dyn std::error::Error>> {
    let db = client.database("basic");

    let docs = vec![
        Document::with_id("bob").field("city", "Porto"),
        Document::with_id("carol").field("city", "Lisbon"),
        Document::with_id("bob").field("city", "Faro"),
    ];
    for (doc, outcome) in docs.iter().zip(db.bulk_write(&docs, false).await?) {
        match outcome {
            BulkWriteOutcome::Accepted { id, rev } => println!("  {} accepted ({})", id, rev),
            BulkWriteOutcome::Conflict { id } => {
                println!("  {} conflict (city {:?})", id, doc.get("city"))
            }
            BulkWriteOutcome::Rejected { id, error, reason } => {
                println!("  {} rejected: {} {}", id, error, reason)
            }
        }
    }

    // All-or-nothing turns collisions into conflicting branches
    let docs = vec![
        Document::with_id("dave").field("city", "Braga"),
        Document::with_id("dave").field("city", "Coimbra"),
    ];
    db.bulk_write(&docs, true).await?;
    let dave = db
        .get_with("dave", &GetOptions::default().conflicts(true))
        .await?;
    println!("dave has {} conflicting revision(s)", dave.conflicts.len());
    Ok(())
}

async fn view_example(client: &Client) -> Result<(), Box<dyn std::error::Error>> {
    let db = client.database("basic");

    let rows = db
        .view("people", "by_city", ViewParams::new().group(true))
        .await?;
    for (city, count) in rows.items() {
        println!("  {} -> {}", city, count);
    }

    let lisbon = db
        .map_only("people", "by_city", ViewParams::new().key("Lisbon"))
        .await?;
    println!("In Lisbon: {:?}", lisbon.ids().collect::<Vec<_>>());
    Ok(())
}
