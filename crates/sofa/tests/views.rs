mod common;

use common::setup;
use sofa::{Document, Params, Value, ViewParams};
use sofa_memory::{ListReply, Reduce};

async fn seed(db: &sofa::Database) {
    for (id, kind, amount) in [
        ("o1", "book", 12),
        ("o2", "pen", 3),
        ("o3", "book", 30),
        ("o4", "lamp", 45),
    ] {
        db.insert(
            Document::with_id(id)
                .field("kind", kind)
                .field("amount", amount as i64),
        )
        .await
        .unwrap();
    }
}

fn register_views(server: &sofa_memory::MemoryServer) {
    server.register_view(
        "shop",
        "orders",
        "by_kind",
        |doc| match (doc.get("kind"), doc.get("amount")) {
            (Some(kind), Some(amount)) => vec![(kind.clone(), amount.clone())],
            _ => Vec::new(),
        },
        Some(Reduce::Sum),
    );
    server.register_view(
        "shop",
        "orders",
        "by_amount",
        |doc| match doc.get("amount") {
            Some(amount) => vec![(amount.clone(), Value::Null)],
            None => Vec::new(),
        },
        None,
    );
}

#[tokio::test]
async fn test_reducing_view() {
    let (server, db) = setup("shop").await;
    register_views(&server);
    seed(&db).await;

    let total = db.view("orders", "by_kind", Params::new()).await.unwrap();
    assert_eq!(total.len(), 1);
    assert_eq!(total.rows[0].value.as_i64(), Some(90));

    let grouped = db
        .view("orders", "by_kind", ViewParams::new().group(true))
        .await
        .unwrap();
    let sums: Vec<(String, i64)> = grouped
        .items()
        .map(|(k, v)| (k.as_str().unwrap().to_string(), v.as_i64().unwrap()))
        .collect();
    assert_eq!(
        sums,
        vec![("book".into(), 42), ("lamp".into(), 45), ("pen".into(), 3)]
    );
}

#[tokio::test]
async fn test_map_only_skips_reduce() {
    let (server, db) = setup("shop").await;
    register_views(&server);
    seed(&db).await;

    let rows = db
        .map_only("orders", "by_kind", ViewParams::new().key("book"))
        .await
        .unwrap();
    assert_eq!(rows.ids().collect::<Vec<_>>(), vec!["o1", "o3"]);
    assert_eq!(rows.decode_values::<i64>().unwrap(), vec![12, 30]);
}

#[tokio::test]
async fn test_view_ranges_and_docs() {
    let (server, db) = setup("shop").await;
    register_views(&server);
    seed(&db).await;

    let rows = db
        .view(
            "orders",
            "by_amount",
            ViewParams::new()
                .start_key(10)
                .end_key(40)
                .include_docs(true),
        )
        .await
        .unwrap();
    assert_eq!(rows.total_rows, Some(4));
    assert_eq!(rows.keys().filter_map(Value::as_i64).collect::<Vec<_>>(), vec![12, 30]);
    assert_eq!(
        rows.docs().filter_map(Document::id).collect::<Vec<_>>(),
        vec!["o1", "o3"]
    );

    let rows = db
        .view(
            "orders",
            "by_amount",
            ViewParams::new().descending(true).limit(2),
        )
        .await
        .unwrap();
    assert_eq!(rows.ids().collect::<Vec<_>>(), vec!["o4", "o3"]);
}

#[tokio::test]
async fn test_missing_view_is_not_found() {
    let (_server, db) = setup("shop").await;
    let err = db.view("orders", "nope", Params::new()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_list_output_is_not_parsed() {
    let (server, db) = setup("shop").await;
    register_views(&server);
    server.register_list("shop", "orders", "csv", |rows, params| {
        let sep = params.get("sep").unwrap_or(",");
        let body: String = rows
            .rows
            .iter()
            .map(|row| format!("{}{}{}\n", row.id.as_deref().unwrap_or(""), sep, row.key))
            .collect();
        ListReply::new("text/csv", body)
    });
    seed(&db).await;

    let output = db
        .list(
            "orders",
            "csv",
            "by_amount",
            ViewParams::new().limit(2).param("sep", ";"),
        )
        .await
        .unwrap();
    assert_eq!(output.content_type.as_deref(), Some("text/csv"));
    assert_eq!(output.text(), "o2;3\no1;12\n");
}

#[tokio::test]
async fn test_update_handler_with_and_without_id() {
    let (server, db) = setup("shop").await;
    server.register_update("shop", "orders", "touch", |doc, form| {
        let mut doc = doc.unwrap_or_else(|| Document::with_id("created"));
        let note = form.get("note").ok_or("note required")?;
        doc.set("note", note);
        Ok(doc)
    });

    let form = Params::new().with("note", "first");
    let created = db.update("orders", "touch", None, &form).await.unwrap();
    assert_eq!(created.id(), Some("created"));
    assert_eq!(created.get("note"), Some(&"first".into()));

    let form = Params::new().with("note", "second");
    let updated = db
        .update("orders", "touch", Some("created"), &form)
        .await
        .unwrap();
    assert_eq!(updated.rev().map(|r| r.generation()), Some(2));
    assert_eq!(db.get("created").await.unwrap().get("note"), Some(&"second".into()));

    let err = db
        .update("orders", "touch", None, &Params::new())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(400));
}
