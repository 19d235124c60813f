//! Persistent response cache backed by SQLite.
//!
//! Every cached response is stored under the canonical form of its
//! request URL (see [`key::RequestKey`]), so two requests for the same
//! resource share one entry even if their URLs differ in parameter
//! order or credentials. Writes are buffered in an open transaction
//! and committed in batches; reads go through the same connection and
//! therefore always see buffered writes.

use std::collections::HashMap;
use std::mem;
use std::path::Path;

use log::{debug, warn};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Connection, Row};
use url::Url;

use crate::{ErrorKind, Payload, Result};

mod key;

use key::RequestKey;

/// Upper bound of bind variables per statement.
/// SQLite rejects statements with more than 999 host parameters.
const SQL_MAX_VARIABLES: usize = 900;

/// Number of buffered writes after which the open transaction is
/// committed
const MAX_PENDING_WRITES: usize = 100;

const CREATE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS responses (
    url TEXT NOT NULL PRIMARY KEY,
    response TEXT NOT NULL,
    last_accessed TEXT NOT NULL
)";

/// An open database connection plus the count of writes that are not
/// yet committed
#[derive(Debug)]
struct Store {
    conn: SqliteConnection,
    pending: usize,
}

impl Store {
    /// Record `count` buffered writes and commit once the batch is
    /// large enough
    async fn note_writes(&mut self, count: usize) -> Result<()> {
        self.pending += count;
        if self.pending >= MAX_PENDING_WRITES {
            debug!("Committing {} buffered cache writes", self.pending);
            self.commit().await?;
        }
        Ok(())
    }

    /// Commit the open transaction and start the next one
    async fn commit(&mut self) -> Result<()> {
        sqlx::query("COMMIT").execute(&mut self.conn).await?;
        sqlx::query("BEGIN").execute(&mut self.conn).await?;
        self.pending = 0;
        Ok(())
    }

    async fn insert(&mut self, url: &Url, payload: &Payload) -> Result<()> {
        let key = RequestKey::new(url);
        sqlx::query(
            "INSERT OR REPLACE INTO responses (url, response, last_accessed) VALUES (?, ?, datetime('now'))",
        )
        .bind(key.as_str())
        .bind(serde_json::to_string(payload)?)
        .execute(&mut self.conn)
        .await?;
        debug!("Stored response for {key}");
        Ok(())
    }
}

#[derive(Debug)]
enum State {
    /// Caching is turned off; lookups miss and writes vanish
    Disabled,
    /// The database is open and usable
    Open(Store),
    /// The database was closed; any further use is an error
    Closed,
}

impl State {
    /// Access the live store.
    ///
    /// Returns `None` for a disabled cache and an error for a closed
    /// one, so callers can treat "no store" and "misuse" differently.
    fn open_mut(&mut self) -> Result<Option<&mut Store>> {
        match self {
            State::Disabled => Ok(None),
            State::Open(store) => Ok(Some(store)),
            State::Closed => Err(ErrorKind::CacheClosed),
        }
    }
}

/// Response cache keyed by canonical request URL.
///
/// All access is serialized over a single connection, which mirrors
/// how the cache is used: one process, many tasks, shared state.
#[derive(Debug)]
pub struct Cache {
    state: tokio::sync::Mutex<State>,
}

impl Cache {
    /// Open the cache database at the given path, creating the file
    /// and schema if needed.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or the schema cannot be
    /// created.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let mut conn = SqliteConnection::connect_with(&options).await?;
        sqlx::query(CREATE_TABLE).execute(&mut conn).await?;
        sqlx::query("BEGIN").execute(&mut conn).await?;
        debug!("Opened response cache at {}", path.as_ref().display());

        Ok(Self {
            state: tokio::sync::Mutex::new(State::Open(Store { conn, pending: 0 })),
        })
    }

    /// A cache that stores nothing: every lookup misses and every
    /// write is dropped
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            state: tokio::sync::Mutex::new(State::Disabled),
        }
    }

    /// Look up the cached response for `url`.
    ///
    /// A stored entry that can no longer be decoded counts as a miss.
    ///
    /// # Errors
    ///
    /// Fails if the cache is closed or the database query fails.
    pub async fn get(&self, url: &Url) -> Result<Option<Payload>> {
        let mut state = self.state.lock().await;
        let Some(store) = state.open_mut()? else {
            return Ok(None);
        };

        let key = RequestKey::new(url);
        let row = sqlx::query("SELECT response FROM responses WHERE url = ?")
            .bind(key.as_str())
            .fetch_optional(&mut store.conn)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(decode_entry(&key, &row.try_get::<String, _>("response")?))
    }

    /// Look up many URLs in one pass.
    ///
    /// The returned vector aligns with `urls`: position `i` holds the
    /// cached response for `urls[i]` or `None` on a miss. Lookups are
    /// batched to stay under the bind variable limit of a single
    /// statement.
    ///
    /// # Errors
    ///
    /// Fails if the cache is closed or a database query fails.
    pub async fn get_many(&self, urls: &[Url]) -> Result<Vec<Option<Payload>>> {
        let mut state = self.state.lock().await;
        let Some(store) = state.open_mut()? else {
            return Ok(vec![None; urls.len()]);
        };

        let keys: Vec<RequestKey> = urls.iter().map(RequestKey::new).collect();
        let mut found: HashMap<String, String> = HashMap::new();

        for chunk in keys.chunks(SQL_MAX_VARIABLES) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let statement =
                format!("SELECT url, response FROM responses WHERE url IN ({placeholders})");

            let mut query = sqlx::query(&statement);
            for key in chunk {
                query = query.bind(key.as_str());
            }

            for row in query.fetch_all(&mut store.conn).await? {
                found.insert(row.try_get("url")?, row.try_get("response")?);
            }
        }

        let results: Vec<Option<Payload>> = keys
            .iter()
            .map(|key| {
                found
                    .get(key.as_str())
                    .and_then(|raw| decode_entry(key, raw))
            })
            .collect();

        let hits = results.iter().filter(|result| result.is_some()).count();
        debug!("Answered {hits} of {} lookups from cache", urls.len());
        Ok(results)
    }

    /// Store a response under the canonical form of `url`, replacing
    /// any previous entry.
    ///
    /// # Errors
    ///
    /// Fails if the cache is closed or the write fails.
    pub async fn insert(&self, url: &Url, payload: &Payload) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(store) = state.open_mut()? else {
            return Ok(());
        };

        store.insert(url, payload).await?;
        store.note_writes(1).await
    }

    /// Store many responses in one pass.
    ///
    /// # Errors
    ///
    /// Fails if the cache is closed or a write fails.
    pub async fn insert_many(&self, entries: &[(Url, Payload)]) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(store) = state.open_mut()? else {
            return Ok(());
        };

        for (url, payload) in entries {
            store.insert(url, payload).await?;
        }
        store.note_writes(entries.len()).await
    }

    /// Delete all entries whose last write is more than `max_age_days`
    /// days ago. The deletion is committed right away.
    ///
    /// An age of zero empties the cache.
    ///
    /// # Errors
    ///
    /// Fails if `max_age_days` is negative, the cache is closed, or
    /// the deletion fails.
    pub async fn evict_older_than(&self, max_age_days: i64) -> Result<()> {
        if max_age_days < 0 {
            return Err(ErrorKind::InvalidMaxAge(max_age_days));
        }

        let mut state = self.state.lock().await;
        let Some(store) = state.open_mut()? else {
            return Ok(());
        };

        let cutoff = format!("-{max_age_days} day");
        let result = sqlx::query("DELETE FROM responses WHERE last_accessed <= datetime('now', ?)")
            .bind(&cutoff)
            .execute(&mut store.conn)
            .await?;
        debug!(
            "Evicted {} cache entries older than {max_age_days} days",
            result.rows_affected()
        );
        store.commit().await
    }

    /// Commit buffered writes and close the database.
    ///
    /// Closing twice is fine; using the cache afterwards is not. A
    /// disabled cache ignores `close` entirely.
    ///
    /// # Errors
    ///
    /// Fails if the final commit or the connection shutdown fails.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let State::Disabled = *state {
            return Ok(());
        }

        match mem::replace(&mut *state, State::Closed) {
            State::Open(mut store) => {
                if store.pending > 0 {
                    debug!("Committing {} buffered cache writes", store.pending);
                }
                sqlx::query("COMMIT").execute(&mut store.conn).await?;
                store.conn.close().await?;
                Ok(())
            }
            State::Disabled | State::Closed => Ok(()),
        }
    }
}

/// Decode a stored cache entry, treating unreadable rows as misses
fn decode_entry(key: &RequestKey, raw: &str) -> Option<Payload> {
    match serde_json::from_str(raw) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!("Cannot decode cache entry for {key}: {e}");
            None
        }
    }
}
