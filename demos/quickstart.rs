// Minimal walk through connect, writes, query, join and aggregate on the local engine.
use serde_json::json;
use tablekit::api::{
    AggregateOp, Catalog, Error, LocalEngine, QueryOptions, Record, StoreOptions, connect,
};
use tablekit::telemetry::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let engine = LocalEngine::new();
    let conn = connect(&engine, "library", 1, |catalog: &mut dyn Catalog, _| {
        catalog.create_store("authors", StoreOptions::key_path("id"))?;
        catalog.create_store("books", StoreOptions::new().with_auto_increment(true))?;
        Ok(())
    })
    .await?;

    conn.insert("authors", json!({"id": 1, "name": "Le Guin"})).await?;
    conn.insert("authors", json!({"id": 2, "name": "Herbert"})).await?;
    for (author, title, pages) in [
        (1, "The Dispossessed", 387),
        (1, "The Lathe of Heaven", 184),
        (2, "Dune", 412),
    ] {
        conn.insert(
            "books",
            json!({"author": author, "title": title, "pages": pages}),
        )
        .await?;
    }

    let long_books = conn
        .query(
            "books",
            QueryOptions::new()
                .with_where(".pages > 200")?
                .order_by("pages DESC")?,
        )
        .await?;
    info!(count = long_books.len(), "books over 200 pages");

    let shelf = conn
        .join(
            ["authors", "books"],
            |a: &Record, b: &Record| a.get("id") == b.get("author"),
            |a: &Record, b: &Record| format!("{} by {}", b["title"], a["name"]),
        )
        .await?;
    for line in &shelf {
        info!("{line}");
    }

    let pages = conn.aggregate("books", AggregateOp::Sum, "pages").await?;
    info!(pages, "total pages");
    Ok(())
}
