pub mod error;
pub mod filter;
pub mod gateway;
pub mod sql;
pub mod transactions;
pub mod value;

use sqlx::Executor;

pub use {
    error::Error,
    gateway::{Gateway, GatewayConfig},
    value::Value,
};

// Conventions for this crate:
//
// Table modules expose free async functions over a borrowed connection,
// conventionally named `ex` after the sqlx `Executor` trait that runs the
// statements. A function issuing a single statement takes `&mut
// PgConnection`; one that must stay atomic across several statements asks
// for `&mut PgTransaction`. Since a transaction dereferences to a plain
// connection, either shape composes into a larger transaction the caller
// owns, and committing stays the caller's job.
//
// Dynamic statements (the generic insert/update paths and the filter
// compiler) never interpolate caller data into SQL text. Identifiers are
// validated and quoted by `sql`, values travel exclusively as positional
// parameters through `value::Value`, and every assembled statement is checked
// against its argument count before execution.
//
// Postgres tests all follow one pattern: open a transaction up front, run
// everything through it, and let it drop without committing. The implicit
// rollback leaves the database empty again, so the ignored tests can share
// one local instance and still run in parallel.

pub type PgTransaction<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

/// Every table this crate touches.
pub const ALL_TABLES: &[&str] = &["transactions"];

/// A table the generic gateway paths are allowed to write to, together with
/// the columns they may touch.
pub struct TableConfig {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

/// Looks up the registered config for a table. Tables without a config are
/// not writable through the generic gateway paths.
pub fn table_config(name: &str) -> Option<&'static TableConfig> {
    match name {
        transactions::TABLE => Some(&transactions::CONFIG),
        _ => None,
    }
}

/// Truncates every known table. Strictly a test helper, hence the name.
#[allow(non_snake_case)]
pub async fn clear_DANGER_(ex: &mut PgTransaction<'_>) -> sqlx::Result<()> {
    for table in ALL_TABLES {
        ex.execute(format!("TRUNCATE {table};").as_str()).await?;
    }
    Ok(())
}
