//! Transactional outbox record store.
//!
//! This crate provides:
//! - `OutboxStore`, a pooled SQLite store for outbox records
//! - Lease-based claiming so many dispatchers can share one outbox
//! - Pluggable payload codecs (JSON by default)
//! - Schema migrations
//! - Standalone query functions for callers that manage their own connection
//!
//! # Usage
//!
//! Records are written inside the caller's business transaction, so the
//! record exists if and only if the business change committed:
//!
//! ```ignore
//! let store: OutboxStore<OrderPlaced> = OutboxStore::open(&settings, PoolConfig::default())?;
//!
//! let mut conn = store.connection()?;
//! let tx = conn.transaction()?;
//! tx.execute("INSERT INTO orders (id) VALUES (?1)", [&order_id])?;
//! store.add_record(&tx, &Record::new(OrderPlaced { order_id }))?;
//! tx.commit()?;
//! ```
//!
//! A dispatcher then works in lease cycles:
//!
//! ```ignore
//! let lock_id = LockId::generate();
//! store.claim_pending_records(&lock_id, Utc::now())?;
//! for mut record in store.get_records_by_lock_id(&lock_id)? {
//!     match publish(&record.message) {
//!         Ok(()) => record.mark_processed(Utc::now()),
//!         Err(e) => record.mark_failed_attempt(Utc::now(), e.to_string()),
//!     }
//!     store.update_record_by_id(&record)?;
//! }
//! store.clear_locks_by_lock_id(&lock_id)?;
//! ```
//!
//! Delivery is at-least-once: a dispatcher that crashes after publishing but
//! before updating leaves the record claimable again once its lease is swept.

mod codec;
mod error;
mod migrations;
mod models;
mod pool;
pub mod queries;
mod settings;
mod store;

#[cfg(test)]
mod tests;

pub use codec::{CodecError, JsonCodec, MessageCodec, RawCodec};
pub use error::{ErrorKind, OutboxError, OutboxResult};
pub use migrations::{run_migrations, schema_version, CURRENT_VERSION};
pub use models::*;
pub use pool::{PoolConfig, PoolState};
pub use settings::{
    StoreSettings, DEFAULT_DATABASE, ENV_DATABASE, ENV_HOST, ENV_PASSWORD, ENV_PORT,
    ENV_USERNAME,
};
pub use store::OutboxStore;
