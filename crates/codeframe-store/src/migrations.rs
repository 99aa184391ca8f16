use codeframe_core::{CoreError, CoreResult};
use rusqlite::Connection;
use tracing::info;

/// One schema migration. Migrations are ordered, idempotent, and
/// forward-only at runtime; each records its own application.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
CREATE TABLE IF NOT EXISTS projects (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL UNIQUE,
    description     TEXT NOT NULL,
    project_type    TEXT NOT NULL,
    phase           TEXT NOT NULL,
    status          TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    workspace_path  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS issues (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id      INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    issue_number    TEXT NOT NULL,
    title           TEXT NOT NULL,
    description     TEXT NOT NULL,
    status          TEXT NOT NULL,
    priority        INTEGER NOT NULL,
    proposed_by     TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS issue_deps (
    issue_id        INTEGER NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
    depends_on_id   INTEGER NOT NULL REFERENCES issues(id),
    PRIMARY KEY (issue_id, depends_on_id)
);

CREATE TABLE IF NOT EXISTS tasks (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id            INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    issue_id              INTEGER NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
    task_number           TEXT NOT NULL,
    title                 TEXT NOT NULL,
    description           TEXT NOT NULL,
    status                TEXT NOT NULL,
    assigned_agent_id     TEXT,
    required_capabilities TEXT NOT NULL,
    commit_sha            TEXT,
    last_error            TEXT,
    created_at            TEXT NOT NULL,
    completed_at          TEXT
);

CREATE TABLE IF NOT EXISTS task_deps (
    task_id         INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    depends_on_id   INTEGER NOT NULL REFERENCES tasks(id),
    PRIMARY KEY (task_id, depends_on_id)
);

CREATE TABLE IF NOT EXISTS agents (
    id              TEXT PRIMARY KEY,
    kind            TEXT NOT NULL,
    provider        TEXT NOT NULL,
    maturity        TEXT NOT NULL,
    status          TEXT NOT NULL,
    current_task_id INTEGER REFERENCES tasks(id),
    last_heartbeat  TEXT NOT NULL,
    metrics         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS project_agents (
    project_id      INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    agent_id        TEXT NOT NULL REFERENCES agents(id),
    role            TEXT NOT NULL,
    assigned_at     TEXT NOT NULL,
    unassigned_at   TEXT,
    is_active       INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS context_items (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id         TEXT NOT NULL,
    project_id       INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    item_type        TEXT NOT NULL,
    content          TEXT NOT NULL,
    importance_score REAL NOT NULL,
    tier             TEXT NOT NULL,
    access_count     INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL,
    last_accessed    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS context_checkpoints (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id            TEXT NOT NULL,
    project_id          INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    checkpoint_data     TEXT NOT NULL,
    items_count         INTEGER NOT NULL,
    items_archived      INTEGER NOT NULL,
    hot_items_retained  INTEGER NOT NULL,
    token_count_before  INTEGER NOT NULL,
    token_count_after   INTEGER NOT NULL,
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS blockers (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id      INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    severity     TEXT NOT NULL,
    reason       TEXT NOT NULL,
    question     TEXT NOT NULL,
    resolution   TEXT,
    created_at   TEXT NOT NULL,
    resolved_at  TEXT
);

CREATE TABLE IF NOT EXISTS lint_results (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id       INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    linter        TEXT NOT NULL,
    error_count   INTEGER NOT NULL,
    warning_count INTEGER NOT NULL,
    files_linted  INTEGER NOT NULL,
    output        TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS discovery_answers (
    project_id   INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    question_id  TEXT NOT NULL,
    category     TEXT NOT NULL,
    answer_text  TEXT NOT NULL,
    answered_at  TEXT NOT NULL,
    PRIMARY KEY (project_id, question_id)
);

CREATE INDEX IF NOT EXISTS idx_context_scope
    ON context_items(project_id, agent_id, tier);
CREATE INDEX IF NOT EXISTS idx_tasks_commit_sha
    ON tasks(commit_sha) WHERE commit_sha IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_lint_task_created
    ON lint_results(task_id, created_at DESC);
"#,
    },
    Migration {
        version: 2,
        name: "context_archive_flag",
        sql: r#"
ALTER TABLE context_items ADD COLUMN archived INTEGER NOT NULL DEFAULT 0;
"#,
    },
    Migration {
        version: 3,
        name: "task_exclusion_flag",
        sql: r#"
ALTER TABLE tasks ADD COLUMN excluded INTEGER NOT NULL DEFAULT 0;
"#,
    },
];

/// Apply all pending migrations in version order.
///
/// Re-applying is a no-op: applied versions are recorded in
/// `schema_migrations` and skipped.
pub fn apply_all(conn: &mut Connection) -> CoreResult<usize> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )
    .map_err(|e| CoreError::Store(e.to_string()))?;

    let mut applied = 0;
    for migration in MIGRATIONS {
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
                [migration.version],
                |row| row.get(0),
            )
            .map_err(|e| CoreError::Store(e.to_string()))?;
        if exists {
            continue;
        }

        let tx = conn
            .transaction()
            .map_err(|e| CoreError::Store(e.to_string()))?;
        tx.execute_batch(migration.sql)
            .map_err(|e| CoreError::Store(format!("migration {}: {e}", migration.version)))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.version,
                migration.name,
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| CoreError::Store(e.to_string()))?;
        tx.commit().map_err(|e| CoreError::Store(e.to_string()))?;

        info!(version = migration.version, name = migration.name, "Applied migration");
        applied += 1;
    }
    Ok(applied)
}
