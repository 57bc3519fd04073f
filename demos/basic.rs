//! Basic example showing transactions and tracing together.
//!
//! Run with: cargo run --example basic

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DbErr};
use sea_orm_tx_tracing::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sea_orm_tx_tracing=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/test".into());

    let config = TracingConfig::builder("postgresql", "test")
        .with_table_key("db.sql.table")
        .with_connection(&database_url)
        .build()?;

    let mut options = ConnectOptions::new(database_url.clone());
    PoolProfile::Default.apply(&mut options);

    tracing::info!("Connecting to database...");
    let db = Database::connect(options).await?;
    let traced = db.with_tracing(OpTracer::with_tracing(config));

    traced
        .scoped(&Context::new())
        .execute_unprepared(
            "CREATE TABLE IF NOT EXISTS orders (id SERIAL PRIMARY KEY, note TEXT NOT NULL)",
        )
        .await?;

    // Registration has the server parse the query, so the table must exist.
    let statements = StatementRegistry::new(traced.clone());
    statements
        .register("count_orders", "SELECT COUNT(*) FROM orders")
        .await?;

    let transactioner = Transactioner::new(traced.clone());
    let request = Context::new();

    // The inner exec joins the outer transaction: one BEGIN, one COMMIT.
    transactioner
        .exec(&request, |ctx| {
            let traced = traced.clone();
            let transactioner = &transactioner;
            async move {
                traced
                    .scoped(&ctx)
                    .execute_unprepared("INSERT INTO orders (note) VALUES ('first')")
                    .await?;

                transactioner
                    .exec(&ctx, |ctx| async move {
                        traced
                            .scoped(&ctx)
                            .execute_unprepared("INSERT INTO orders (note) VALUES ('second')")
                            .await?;
                        Ok::<_, DbErr>(())
                    })
                    .await
                    .map_err(TxError::flatten)?;

                Ok::<_, DbErr>(())
            }
        })
        .await
        .map_err(TxError::flatten)?;

    let row = traced
        .scoped(&request)
        .query_one(statements.get("count_orders")?.statement())
        .await?;
    if let Some(row) = row {
        let orders: i64 = row.try_get_by_index(0)?;
        tracing::info!(orders, "orders counted");
    }

    statements.close()?;
    Ok(())
}
