use chrono::{DateTime, Utc};
use codeframe_core::{CoreError, CoreResult};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// The sole writer of persistent state.
///
/// A store-wide async lock around the connection serializes the write path;
/// every method acquires it, runs its statements synchronously, and releases
/// before the caller's next suspension point.
#[derive(Clone)]
pub struct Store {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the store at the given path and apply migrations.
    pub async fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let mut conn = Connection::open(path.as_ref()).map_err(s_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .map_err(s_err)?;
        let applied = crate::migrations::apply_all(&mut conn)?;
        info!(path = %path.as_ref().display(), applied, "Store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests and ephemeral runs.
    pub async fn open_in_memory() -> CoreResult<Self> {
        let mut conn = Connection::open_in_memory().map_err(s_err)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(s_err)?;
        crate::migrations::apply_all(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

pub(crate) fn s_err(e: rusqlite::Error) -> CoreError {
    CoreError::Store(e.to_string())
}

pub(crate) fn now_str() -> String {
    Utc::now().to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::Store(format!("Bad timestamp '{s}': {e}")))
}

/// Cycle detection over a dependency adjacency map.
///
/// Three-color DFS: 1 = in progress (back edge means a cycle), 2 = done.
pub(crate) fn has_cycle(adjacency: &HashMap<i64, Vec<i64>>) -> bool {
    let mut visited: HashMap<i64, u8> = HashMap::new();
    for &node in adjacency.keys() {
        if dfs_cycle(node, adjacency, &mut visited) {
            return true;
        }
    }
    false
}

fn dfs_cycle(node: i64, adjacency: &HashMap<i64, Vec<i64>>, visited: &mut HashMap<i64, u8>) -> bool {
    match visited.get(&node) {
        Some(1) => return true,
        Some(2) => return false,
        _ => {}
    }
    visited.insert(node, 1);
    if let Some(deps) = adjacency.get(&node) {
        for &dep in deps {
            if dfs_cycle(dep, adjacency, visited) {
                return true;
            }
        }
    }
    visited.insert(node, 2);
    false
}
