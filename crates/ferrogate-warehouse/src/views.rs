//! Database views for availability dashboards.

use ::duckdb::Connection;

/// Create database views over the request log and breaker state.
///
/// Creates the following views:
/// - `vw_provider_availability`: success ratio and short-circuit counts per provider
/// - `vw_provider_latency`: average and p95 latency of attempted calls per provider
/// - `vw_recent_failures`: failed and short-circuited attempts, newest first
/// - `vw_breaker_overview`: breaker rows with readable timestamps
///
/// # Errors
/// Returns an error if the view creation SQL fails to execute.
pub fn create_views(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r"
CREATE OR REPLACE VIEW vw_provider_availability AS
SELECT
    provider_id,
    COUNT(*) AS attempts,
    COUNT(*) FILTER (WHERE outcome = 'success') AS successes,
    COUNT(*) FILTER (WHERE outcome = 'failure') AS failures,
    COUNT(*) FILTER (WHERE outcome = 'short_circuited') AS short_circuited,
    CASE
        WHEN COUNT(*) = 0 THEN NULL
        ELSE (COUNT(*) FILTER (WHERE outcome = 'success'))::DOUBLE / COUNT(*)
    END AS availability
FROM api_request_log
GROUP BY provider_id;

CREATE OR REPLACE VIEW vw_provider_latency AS
SELECT
    provider_id,
    AVG(duration_ms)::DOUBLE AS avg_duration_ms,
    QUANTILE_CONT(duration_ms, 0.95)::DOUBLE AS p95_duration_ms
FROM api_request_log
WHERE outcome <> 'short_circuited'
GROUP BY provider_id;

CREATE OR REPLACE VIEW vw_recent_failures AS
SELECT
    correlation_id,
    provider_id,
    started_at,
    outcome,
    status_code,
    error_kind,
    error_message
FROM api_request_log
WHERE outcome <> 'success'
ORDER BY started_at_ms DESC;

CREATE OR REPLACE VIEW vw_breaker_overview AS
SELECT
    provider_id,
    state,
    consecutive_failures,
    CASE WHEN opened_at_ms IS NULL THEN NULL ELSE epoch_ms(opened_at_ms) END AS opened_at,
    CASE
        WHEN trial_claimed_at_ms IS NULL THEN NULL
        ELSE epoch_ms(trial_claimed_at_ms)
    END AS trial_claimed_at,
    version,
    updated_at
FROM breaker_state;
",
    )?;

    Ok(())
}
