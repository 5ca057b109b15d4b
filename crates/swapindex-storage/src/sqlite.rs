//! SQLite storage backend for swapindex.
//!
//! Persists the scan cursor, swaps and sealed merkle windows to a single
//! SQLite file. Uses `sqlx` with WAL mode so queries can read while the
//! scanner commits. Every height commit runs in one transaction.
//!
//! # Usage
//! ```rust,no_run
//! use swapindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./swaps.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, SecondsFormat, Utc};
use num_bigint::BigUint;
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use swapindex_core::cursor::ScanCursor;
use swapindex_core::error::IndexerError;
use swapindex_core::merkle::NodeHash;
use swapindex_core::store::{
    check_recommit, merged_cursor, validate_commit, was_committed, CommitOutcome, SwapStore,
    WindowStore,
};
use swapindex_core::types::{Coin, NaturalKey, SwapEvent};
use swapindex_core::window::MerkleWindow;

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

const EVENT_COLUMNS: &str = "height, tx_index, event_index, pool_id, sender, \
     token_in_denom, token_in_amount, token_out, usd_value, block_time";

/// SQLite-backed swap, cursor and window store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./swaps.db"`) or a full
    /// SQLite URL (`"sqlite:./swaps.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// A single connection keeps every query on the same database. All data
    /// is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS scan_cursor (
                id                    INTEGER PRIMARY KEY CHECK (id = 1),
                start_height          INTEGER NOT NULL,
                last_completed_height INTEGER NOT NULL,
                updated_at            INTEGER NOT NULL,
                committed_through     INTEGER
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS swap_events (
                height          INTEGER NOT NULL,
                tx_index        INTEGER NOT NULL,
                event_index     INTEGER NOT NULL,
                pool_id         INTEGER NOT NULL,
                sender          TEXT    NOT NULL,
                token_in_denom  TEXT    NOT NULL,
                token_in_amount TEXT    NOT NULL,
                token_out       TEXT,
                usd_value       TEXT,
                block_time      TEXT,
                PRIMARY KEY (height, tx_index, event_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_swap_events_unpriced
                ON swap_events (height, tx_index, event_index) WHERE usd_value IS NULL;",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS merkle_windows (
                window_id    INTEGER PRIMARY KEY,
                start_height INTEGER NOT NULL,
                end_height   INTEGER NOT NULL,
                leaf_hashes  TEXT    NOT NULL,
                root         TEXT    NOT NULL,
                built_at     INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Total number of stored swaps.
    pub async fn event_count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM swap_events")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn row_to_event(row: &SqliteRow) -> Result<SwapEvent, IndexerError> {
    let corrupt = |what: &str, e: String| IndexerError::Storage(format!("corrupt {what}: {e}"));

    let amount: String = row.try_get("token_in_amount").map_err(storage_err)?;
    let amount = BigUint::from_str(&amount).map_err(|e| corrupt("amount", e.to_string()))?;
    let token_out = row
        .try_get::<Option<String>, _>("token_out")
        .map_err(storage_err)?
        .map(|s| Coin::parse(&s).map_err(|e| corrupt("token_out", e.to_string())))
        .transpose()?;
    let usd_value = row
        .try_get::<Option<String>, _>("usd_value")
        .map_err(storage_err)?
        .map(|s| BigDecimal::from_str(&s).map_err(|e| corrupt("usd_value", e.to_string())))
        .transpose()?;
    let block_time = row
        .try_get::<Option<String>, _>("block_time")
        .map_err(storage_err)?
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| corrupt("block_time", e.to_string()))
        })
        .transpose()?;

    Ok(SwapEvent {
        height: row.try_get::<i64, _>("height").map_err(storage_err)? as u64,
        tx_index: row.try_get::<i64, _>("tx_index").map_err(storage_err)? as u32,
        event_index: row.try_get::<i64, _>("event_index").map_err(storage_err)? as u32,
        pool_id: row.try_get::<i64, _>("pool_id").map_err(storage_err)? as u64,
        sender: row.try_get("sender").map_err(storage_err)?,
        token_in: Coin {
            denom: row.try_get("token_in_denom").map_err(storage_err)?,
            amount,
        },
        token_out,
        usd_value,
        block_time,
    })
}

fn row_to_window(row: &SqliteRow) -> Result<MerkleWindow, IndexerError> {
    let leaves: String = row.try_get("leaf_hashes").map_err(storage_err)?;
    let leaf_hashes: Vec<NodeHash> = serde_json::from_str(&leaves)
        .map_err(|e| IndexerError::Storage(format!("corrupt leaf list: {e}")))?;
    let root: String = row.try_get("root").map_err(storage_err)?;
    Ok(MerkleWindow {
        window_id: row.try_get::<i64, _>("window_id").map_err(storage_err)? as u64,
        start_height: row.try_get::<i64, _>("start_height").map_err(storage_err)? as u64,
        end_height: row.try_get::<i64, _>("end_height").map_err(storage_err)? as u64,
        leaf_hashes,
        root: NodeHash::from_hex(&root).map_err(IndexerError::Storage)?,
        built_at: row.try_get("built_at").map_err(storage_err)?,
    })
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

async fn load_cursor(conn: &mut SqliteConnection) -> Result<Option<ScanCursor>, IndexerError> {
    let row = sqlx::query(
        "SELECT start_height, last_completed_height, updated_at FROM scan_cursor WHERE id = 1",
    )
    .fetch_optional(&mut *conn)
    .await
    .map_err(storage_err)?;
    Ok(row.map(|r| ScanCursor {
        start_height: r.get::<i64, _>("start_height") as u64,
        last_completed_height: r.get::<i64, _>("last_completed_height") as u64,
        updated_at: r.get("updated_at"),
    }))
}

async fn store_cursor(conn: &mut SqliteConnection, cursor: &ScanCursor) -> Result<(), IndexerError> {
    sqlx::query(
        "INSERT INTO scan_cursor (id, start_height, last_completed_height, updated_at)
         VALUES (1, ?, ?, ?)
         ON CONFLICT (id) DO UPDATE SET
            start_height          = excluded.start_height,
            last_completed_height = excluded.last_completed_height,
            updated_at            = excluded.updated_at",
    )
    .bind(cursor.start_height as i64)
    .bind(cursor.last_completed_height as i64)
    .bind(cursor.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(storage_err)?;
    Ok(())
}

/// Highest height ever committed; not lowered by cursor resets.
async fn load_watermark(conn: &mut SqliteConnection) -> Result<Option<u64>, IndexerError> {
    let row = sqlx::query("SELECT committed_through FROM scan_cursor WHERE id = 1")
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage_err)?;
    Ok(row
        .and_then(|r| r.get::<Option<i64>, _>("committed_through"))
        .map(|h| h as u64))
}

async fn raise_watermark(conn: &mut SqliteConnection, height: u64) -> Result<(), IndexerError> {
    sqlx::query(
        "UPDATE scan_cursor
            SET committed_through = MAX(COALESCE(committed_through, ?), ?)
          WHERE id = 1",
    )
    .bind(height as i64)
    .bind(height as i64)
    .execute(&mut *conn)
    .await
    .map_err(storage_err)?;
    Ok(())
}

async fn insert_event(conn: &mut SqliteConnection, ev: &SwapEvent) -> Result<(), IndexerError> {
    sqlx::query(&format!(
        "INSERT INTO swap_events ({EVENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(ev.height as i64)
    .bind(ev.tx_index as i64)
    .bind(ev.event_index as i64)
    .bind(ev.pool_id as i64)
    .bind(&ev.sender)
    .bind(&ev.token_in.denom)
    .bind(ev.token_in.amount.to_string())
    .bind(ev.token_out.as_ref().map(|c| c.to_string()))
    .bind(ev.usd_value.as_ref().map(|v| v.to_string()))
    .bind(ev.block_time.as_ref().map(format_time))
    .execute(&mut *conn)
    .await
    .map_err(storage_err)?;
    Ok(())
}

// ─── SwapStore ───────────────────────────────────────────────────────────────

#[async_trait]
impl SwapStore for SqliteStore {
    async fn commit_height(
        &self,
        height: u64,
        events: &[SwapEvent],
        new_cursor: &ScanCursor,
    ) -> Result<CommitOutcome, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let stored = load_cursor(&mut *tx)
            .await?
            .unwrap_or_else(|| ScanCursor::genesis(new_cursor.start_height));
        validate_commit(height, events, new_cursor, &stored)?;

        let existing_rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM swap_events WHERE height = ?
             ORDER BY tx_index, event_index"
        ))
        .bind(height as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(storage_err)?;
        let existing = existing_rows
            .iter()
            .map(row_to_event)
            .collect::<Result<Vec<_>, _>>()?;
        let watermark = load_watermark(&mut *tx).await?;
        check_recommit(height, was_committed(height, watermark), &existing, events)?;

        let mut outcome = CommitOutcome::default();
        for ev in events {
            let Some(old) = existing.iter().find(|e| e.key() == ev.key()) else {
                insert_event(&mut *tx, ev).await?;
                outcome.inserted += 1;
                continue;
            };
            let fill_usd = old.usd_value.is_none() && ev.usd_value.is_some();
            let fill_time = old.block_time.is_none() && ev.block_time.is_some();
            if !(fill_usd || fill_time) {
                outcome.unchanged += 1;
                continue;
            }
            sqlx::query(
                "UPDATE swap_events
                    SET usd_value  = COALESCE(usd_value, ?),
                        block_time = COALESCE(block_time, ?)
                  WHERE height = ? AND tx_index = ? AND event_index = ?",
            )
            .bind(ev.usd_value.as_ref().map(|v| v.to_string()))
            .bind(ev.block_time.as_ref().map(format_time))
            .bind(ev.height as i64)
            .bind(ev.tx_index as i64)
            .bind(ev.event_index as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
            outcome.filled += 1;
        }

        store_cursor(&mut *tx, &merged_cursor(&stored, new_cursor)).await?;
        raise_watermark(&mut *tx, height).await?;
        tx.commit().await.map_err(storage_err)?;

        debug!(height, inserted = outcome.inserted, unchanged = outcome.unchanged, "height committed to sqlite");
        Ok(outcome)
    }

    async fn read_cursor(&self, start_height: u64) -> Result<ScanCursor, IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        Ok(load_cursor(&mut conn)
            .await?
            .unwrap_or_else(|| ScanCursor::genesis(start_height)))
    }

    async fn read_events_in_range(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Vec<SwapEvent>, IndexerError> {
        if start > end {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM swap_events
              WHERE height >= ? AND height <= ?
              ORDER BY height, tx_index, event_index"
        ))
        .bind(start as i64)
        .bind(end as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(row_to_event).collect()
    }

    async fn read_event(&self, key: NaturalKey) -> Result<Option<SwapEvent>, IndexerError> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM swap_events
              WHERE height = ? AND tx_index = ? AND event_index = ?"
        ))
        .bind(key.height as i64)
        .bind(key.tx_index as i64)
        .bind(key.event_index as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn reset_cursor(&self, cursor: &ScanCursor) -> Result<(), IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        store_cursor(&mut conn, cursor).await?;
        debug!(last_completed = cursor.last_completed_height, "cursor reset");
        Ok(())
    }

    async fn unpriced_events(
        &self,
        after: Option<NaturalKey>,
        limit: usize,
    ) -> Result<Vec<SwapEvent>, IndexerError> {
        let (h, t, e) = after.map_or((-1, -1, -1), |k| {
            (k.height as i64, k.tx_index as i64, k.event_index as i64)
        });
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM swap_events
              WHERE usd_value IS NULL
                AND (height, tx_index, event_index) > (?, ?, ?)
              ORDER BY height, tx_index, event_index
              LIMIT ?"
        ))
        .bind(h)
        .bind(t)
        .bind(e)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(row_to_event).collect()
    }

    async fn fill_usd_value(
        &self,
        key: NaturalKey,
        value: &BigDecimal,
    ) -> Result<bool, IndexerError> {
        let result = sqlx::query(
            "UPDATE swap_events SET usd_value = ?
              WHERE height = ? AND tx_index = ? AND event_index = ? AND usd_value IS NULL",
        )
        .bind(value.to_string())
        .bind(key.height as i64)
        .bind(key.tx_index as i64)
        .bind(key.event_index as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.read_event(key).await? {
            Some(_) => Ok(false),
            None => Err(IndexerError::NotFound(format!("swap {key}"))),
        }
    }
}

// ─── WindowStore ─────────────────────────────────────────────────────────────

#[async_trait]
impl WindowStore for SqliteStore {
    async fn save_window(&self, window: &MerkleWindow) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let existing = sqlx::query("SELECT root FROM merkle_windows WHERE window_id = ?")
            .bind(window.window_id as i64)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?;
        if let Some(row) = existing {
            let root: String = row.get("root");
            if root != window.root.to_hex() {
                return Err(IndexerError::ConsistencyViolation(format!(
                    "window {} already sealed with root {root}, rebuild gave {}",
                    window.window_id, window.root
                )));
            }
            return Ok(());
        }

        let leaves = serde_json::to_string(&window.leaf_hashes)
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        sqlx::query(
            "INSERT INTO merkle_windows
                (window_id, start_height, end_height, leaf_hashes, root, built_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(window.window_id as i64)
        .bind(window.start_height as i64)
        .bind(window.end_height as i64)
        .bind(leaves)
        .bind(window.root.to_hex())
        .bind(window.built_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn load_window(&self, window_id: u64) -> Result<Option<MerkleWindow>, IndexerError> {
        let row = sqlx::query("SELECT * FROM merkle_windows WHERE window_id = ?")
            .bind(window_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_window).transpose()
    }

    async fn latest_window(&self) -> Result<Option<MerkleWindow>, IndexerError> {
        let row = sqlx::query("SELECT * FROM merkle_windows ORDER BY window_id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(row_to_window).transpose()
    }
}
