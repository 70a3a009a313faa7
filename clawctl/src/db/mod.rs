//! Persistence layer.
//!
//! The controller treats its record store as an external collaborator and only talks to it
//! through the traits in [`handlers`]:
//!
//! ```text
//! ┌──────────────────────────┐
//! │ API handlers / services  │
//! └────────────┬─────────────┘
//!              │ Arc<dyn DeploymentStore | UsageStore | MessageStore>
//!              ↓
//! ┌──────────────────────────┐
//! │ db::handlers (Pg*)       │  filtered queries, single-record CRUD
//! └────────────┬─────────────┘
//!              ↓
//! ┌──────────────────────────┐
//! │ PostgreSQL               │  created_at / updated_at assigned here
//! └──────────────────────────┘
//! ```
//!
//! There are no cross-record transactions. Writers load a record, mutate it and save it back
//! whole; concurrent writers are last-write-wins.
//!
//! # Modules
//!
//! - [`handlers`]: Store traits and PostgreSQL implementations
//! - [`models`]: Record structures matching table schemas
//! - [`errors`]: Store-specific error types

pub mod errors;
pub mod handlers;
pub mod models;

use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

use crate::config::DatabaseConfig;

/// Get the clawctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Connect to PostgreSQL and bring the schema up to date.
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(Some(Duration::from_secs(600)))
        .connect(&config.url)
        .await?;

    migrator().run(&pool).await?;

    Ok(pool)
}
