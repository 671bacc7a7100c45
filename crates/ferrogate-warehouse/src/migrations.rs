use ::duckdb::{params, Connection};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_breaker_state",
        sql: r#"
CREATE TABLE IF NOT EXISTS breaker_state (
    provider_id TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    consecutive_failures BIGINT NOT NULL DEFAULT 0,
    opened_at_ms BIGINT,
    trial_claimed_at_ms BIGINT,
    version BIGINT NOT NULL DEFAULT 0,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0002_api_request_log",
        sql: r#"
CREATE SEQUENCE IF NOT EXISTS api_request_log_id_seq START 1;

CREATE TABLE IF NOT EXISTS api_request_log (
    request_id BIGINT PRIMARY KEY DEFAULT nextval('api_request_log_id_seq'),
    correlation_id TEXT NOT NULL,
    provider_id TEXT NOT NULL,
    http_method TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    started_at TIMESTAMP NOT NULL,
    started_at_ms BIGINT NOT NULL,
    duration_ms BIGINT NOT NULL,
    outcome TEXT NOT NULL,
    status_code INTEGER,
    error_kind TEXT,
    error_message TEXT,
    breaker_state TEXT NOT NULL,
    request_headers TEXT,
    request_payload TEXT,
    response_headers TEXT,
    response_excerpt TEXT,
    recorded_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0003_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_api_request_log_provider_ts
    ON api_request_log(provider_id, started_at_ms);
CREATE INDEX IF NOT EXISTS idx_api_request_log_outcome_ts
    ON api_request_log(outcome, started_at_ms);
CREATE INDEX IF NOT EXISTS idx_api_request_log_correlation
    ON api_request_log(correlation_id);
"#,
    },
];

/// Apply every migration that is not yet recorded in `schema_migrations`.
pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params![migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params![migration.version],
            )?;
        }
    }

    Ok(())
}

/// Versions of every migration known to this build, in application order.
pub fn known_versions() -> Vec<&'static str> {
    MIGRATIONS.iter().map(|migration| migration.version).collect()
}
