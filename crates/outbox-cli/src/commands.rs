//! Maintenance commands run against an open store.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use outbox_store::{
    schema_version, OutboxStore, PoolConfig, RawCodec, StateSummary, StoreSettings,
};
use std::path::Path;
use tracing::info;

/// Payloads are never decoded by maintenance commands.
pub type RawStore = OutboxStore<Vec<u8>, RawCodec>;

/// Build settings from an optional config file, the environment, and an
/// explicit database path, in increasing order of precedence.
pub fn resolve_settings<F>(
    config: Option<&Path>,
    database: Option<&Path>,
    lookup: F,
) -> Result<StoreSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = match config {
        Some(path) => StoreSettings::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => StoreSettings::default(),
    };
    settings
        .apply_overrides(lookup)
        .context("Invalid environment override")?;
    if let Some(database) = database {
        settings.database = database.to_string_lossy().to_string();
    }
    Ok(settings)
}

/// Open the store, running any pending migrations.
pub fn open(settings: &StoreSettings) -> Result<RawStore> {
    OutboxStore::open_with_codec(settings, PoolConfig::default(), RawCodec)
        .with_context(|| format!("Failed to open outbox store {:?}", settings.database))
}

/// Report the schema version after migrating.
pub fn migrate(store: &RawStore) -> Result<i32> {
    let conn = store.connection()?;
    let version = schema_version(&conn)?;
    info!(version, path = %store.path().display(), "Outbox schema up to date");
    Ok(version)
}

pub fn status(store: &RawStore) -> Result<StateSummary> {
    Ok(store.count_records_by_state()?)
}

/// Release leases older than `stale_after` seconds.
pub fn sweep(store: &RawStore, now: DateTime<Utc>, stale_after: u64) -> Result<usize> {
    let threshold = before(now, stale_after)?;
    let count = store
        .clear_locks_with_duration_before_date(threshold)
        .context("Failed to clear stale locks")?;
    Ok(count)
}

/// Delete records created more than `older_than` seconds ago.
pub fn purge(store: &RawStore, now: DateTime<Utc>, older_than: u64) -> Result<usize> {
    let threshold = before(now, older_than)?;
    let count = store
        .remove_records_before_datetime(threshold)
        .context("Failed to remove expired records")?;
    Ok(count)
}

pub fn health(store: &RawStore) -> Result<()> {
    store.health_check().context("Outbox store health check failed")
}

fn before(now: DateTime<Utc>, secs: u64) -> Result<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|age| now.checked_sub_signed(age))
        .with_context(|| format!("{} seconds is out of range", secs))
}
