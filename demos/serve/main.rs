//! Serve a mongoke configuration
//!
//! ```sh
//! cargo run --example serve -- demos/serve/mongoke.yml
//! ```
//!
//! The configuration path is the first argument, then `MONGOKE_CONFIG`.
//! Without a `database_uri` the types are served from an in-memory store
//! seeded with a few documents.
//!
//! Endpoints:
//! - `POST /graphql`
//! - `GET /graphql/playground`
//! - `GET /graphql/schema`
//! - `GET /health`

use mongoke::prelude::*;
use serde_json::json;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "demos/serve/mongoke.yml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mongoke=debug,info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MONGOKE_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let addr = std::env::var("MONGOKE_ADDR").unwrap_or_else(|_| "127.0.0.1:4000".to_string());

    let config = MongokeConfig::from_yaml_file(&path)?;
    tracing::info!(config = %path, "loaded configuration");

    let builder = if config.database_uri().is_some() {
        ServerBuilder::new().with_config(config).connect().await?
    } else {
        tracing::info!("no database_uri, serving seeded in-memory data");
        ServerBuilder::new()
            .with_config(config)
            .with_store(seed()?)
    };

    println!("🚀 mongoke listening on http://{}", addr);
    println!("   playground: http://{}/graphql/playground", addr);
    println!("   schema:     http://{}/graphql/schema", addr);

    builder.serve(&addr).await
}

fn seed() -> Result<InMemoryStore> {
    let store = InMemoryStore::new();
    store.insert_many(
        "users",
        vec![
            json!({"_id": "u1", "name": "Alice", "age": 34, "role": "ADMIN"}),
            json!({"_id": "u2", "name": "Bob", "age": 27, "role": "USER"}),
            json!({"_id": "u3", "name": "Carol", "age": 41, "role": "USER"}),
        ],
    )?;
    store.insert_many(
        "posts",
        vec![
            json!({"_id": "p1", "title": "Hello", "author_id": "u1", "published": true}),
            json!({"_id": "p2", "title": "Draft", "author_id": "u1", "published": false}),
            json!({"_id": "p3", "title": "Notes", "author_id": "u2", "published": true}),
        ],
    )?;
    store.insert("audits", json!({"_id": "a1", "action": "login"}))?;
    Ok(store)
}
