//! Request telemetry audit log.

use ::duckdb::{params, Row, ToSql};
use serde::Serialize;

use crate::{Warehouse, WarehouseError};

/// One attempted upstream call. Outcome is `success`, `failure` or
/// `short_circuited`.
///
/// Rows are keyed by a generated id, so several calls may share a correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiRequestRecord {
    pub correlation_id: String,
    pub provider_id: String,
    pub http_method: String,
    pub endpoint: String,
    pub started_at_ms: i64,
    pub duration_ms: i64,
    pub outcome: String,
    pub status_code: Option<i32>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub breaker_state: String,
    /// JSON object of header name to value.
    pub request_headers: Option<String>,
    pub request_payload: Option<String>,
    /// JSON object of header name to value.
    pub response_headers: Option<String>,
    pub response_excerpt: Option<String>,
}

/// Filter for [`Warehouse::query_api_requests`]. Results are newest first.
#[derive(Debug, Clone)]
pub struct ApiRequestFilter {
    pub provider_id: Option<String>,
    pub outcome: Option<String>,
    pub correlation_id: Option<String>,
    /// Inclusive lower bound on `started_at_ms`.
    pub since_ms: Option<i64>,
    /// Exclusive upper bound on `started_at_ms`.
    pub until_ms: Option<i64>,
    pub limit: usize,
}

impl Default for ApiRequestFilter {
    fn default() -> Self {
        Self {
            provider_id: None,
            outcome: None,
            correlation_id: None,
            since_ms: None,
            until_ms: None,
            limit: 100,
        }
    }
}

/// Attempt counts and success ratio for one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderAvailability {
    pub provider_id: String,
    pub attempts: i64,
    pub successes: i64,
    pub failures: i64,
    pub short_circuited: i64,
    /// `successes / attempts`; `None` when nothing was attempted.
    pub availability: Option<f64>,
}

/// Latency of attempted calls for one provider, read from `vw_provider_latency`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderLatency {
    pub provider_id: String,
    pub avg_duration_ms: f64,
    pub p95_duration_ms: f64,
}

const SELECT_COLUMNS: &str = "SELECT correlation_id, provider_id, http_method, endpoint, \
     started_at_ms, duration_ms, outcome, status_code, error_kind, error_message, \
     breaker_state, request_headers, request_payload, response_headers, response_excerpt \
     FROM api_request_log";

impl Warehouse {
    /// Append one entry under a fresh row id.
    pub fn append_api_request(&self, record: &ApiRequestRecord) -> Result<(), WarehouseError> {
        let connection = self.connection()?;
        connection.execute(
            "INSERT INTO api_request_log (
                correlation_id, provider_id, http_method, endpoint,
                started_at, started_at_ms, duration_ms, outcome, status_code,
                error_kind, error_message, breaker_state,
                request_headers, request_payload, response_headers, response_excerpt
            ) VALUES (
                ?, ?, ?, ?, epoch_ms(CAST(? AS BIGINT)), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            )",
            params![
                record.correlation_id,
                record.provider_id,
                record.http_method,
                record.endpoint,
                record.started_at_ms,
                record.started_at_ms,
                record.duration_ms,
                record.outcome,
                record.status_code,
                record.error_kind,
                record.error_message,
                record.breaker_state,
                record.request_headers,
                record.request_payload,
                record.response_headers,
                record.response_excerpt
            ],
        )?;
        Ok(())
    }

    pub fn query_api_requests(
        &self,
        filter: &ApiRequestFilter,
    ) -> Result<Vec<ApiRequestRecord>, WarehouseError> {
        if filter.limit == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "limit must be greater than zero",
            )));
        }

        let limit = i64::try_from(filter.limit).unwrap_or(i64::MAX);
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<&dyn ToSql> = Vec::new();

        if let Some(provider_id) = &filter.provider_id {
            clauses.push("provider_id = ?");
            values.push(provider_id);
        }
        if let Some(outcome) = &filter.outcome {
            clauses.push("outcome = ?");
            values.push(outcome);
        }
        if let Some(correlation_id) = &filter.correlation_id {
            clauses.push("correlation_id = ?");
            values.push(correlation_id);
        }
        if let Some(since_ms) = &filter.since_ms {
            clauses.push("started_at_ms >= ?");
            values.push(since_ms);
        }
        if let Some(until_ms) = &filter.until_ms {
            clauses.push("started_at_ms < ?");
            values.push(until_ms);
        }
        values.push(&limit);

        let mut sql = String::from(SELECT_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY started_at_ms DESC, request_id DESC LIMIT ?");

        let connection = self.connection()?;
        let mut statement = connection.prepare(&sql)?;
        let records = statement
            .query_map(values.as_slice(), map_request_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Per-provider availability over entries started at or after `since_ms`.
    pub fn provider_availability(
        &self,
        since_ms: Option<i64>,
    ) -> Result<Vec<ProviderAvailability>, WarehouseError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare(
            "SELECT
                provider_id,
                COUNT(*) AS attempts,
                COUNT(*) FILTER (WHERE outcome = 'success') AS successes,
                COUNT(*) FILTER (WHERE outcome = 'failure') AS failures,
                COUNT(*) FILTER (WHERE outcome = 'short_circuited') AS short_circuited
            FROM api_request_log
            WHERE started_at_ms >= ?
            GROUP BY provider_id
            ORDER BY provider_id",
        )?;

        let since_ms = since_ms.unwrap_or(i64::MIN);
        let summaries = statement
            .query_map(params![since_ms], |row| {
                let attempts: i64 = row.get(1)?;
                let successes: i64 = row.get(2)?;
                Ok(ProviderAvailability {
                    provider_id: row.get(0)?,
                    attempts,
                    successes,
                    failures: row.get(3)?,
                    short_circuited: row.get(4)?,
                    availability: (attempts > 0).then(|| successes as f64 / attempts as f64),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    /// Average and 95th percentile duration per provider. Short-circuited calls
    /// never reached the provider and are left out.
    pub fn provider_latency(&self) -> Result<Vec<ProviderLatency>, WarehouseError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare(
            "SELECT provider_id, avg_duration_ms, p95_duration_ms
            FROM vw_provider_latency
            ORDER BY provider_id",
        )?;
        let latencies = statement
            .query_map([], |row| {
                Ok(ProviderLatency {
                    provider_id: row.get(0)?,
                    avg_duration_ms: row.get(1)?,
                    p95_duration_ms: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(latencies)
    }
}

fn map_request_row(row: &Row<'_>) -> Result<ApiRequestRecord, ::duckdb::Error> {
    Ok(ApiRequestRecord {
        correlation_id: row.get(0)?,
        provider_id: row.get(1)?,
        http_method: row.get(2)?,
        endpoint: row.get(3)?,
        started_at_ms: row.get(4)?,
        duration_ms: row.get(5)?,
        outcome: row.get(6)?,
        status_code: row.get(7)?,
        error_kind: row.get(8)?,
        error_message: row.get(9)?,
        breaker_state: row.get(10)?,
        request_headers: row.get(11)?,
        request_payload: row.get(12)?,
        response_headers: row.get(13)?,
        response_excerpt: row.get(14)?,
    })
}
