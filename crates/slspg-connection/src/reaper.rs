//! Idle-connection reaping for the caller's own user/database pair
//!
//! When many invocations cold-start at once, finished invocations leave
//! idle sessions behind that hold slots until the server times them out.
//! Once utilization crosses the configured threshold, the oldest-idle of
//! those sessions are terminated to make room.

use slspg_core::{Result, SlsError, Value};
use tokio::time::Instant;

use crate::{DiagnosticEvent, ServerlessConnection};

/// Sessions open for a user/database pair.
pub const PROCESS_COUNT_SQL: &str = "
    SELECT COUNT(pid)
    FROM pg_stat_activity
    WHERE datname = $1
      AND usename = $2";

/// Server connection ceiling.
pub const MAX_CONNECTIONS_SQL: &str =
    "SELECT setting::int8 FROM pg_settings WHERE name = 'max_connections'";

/// Idle sessions of a user/database pair, idle for longer than `$3` seconds,
/// at most `$4` rows (`NULL` is unbounded).
pub const IDLE_PROCESSES_SQL: &str = "
    WITH processes AS (
      SELECT
         EXTRACT(EPOCH FROM (now() - state_change))::float8 AS idle_time,
         pid
      FROM pg_stat_activity
      WHERE usename = $1
        AND datname = $2
        AND state = 'idle'
    )
    SELECT pid
    FROM processes
    WHERE idle_time > $3::float8
    LIMIT $4::int8";

/// Terminate sessions that are still idle.
pub const KILL_PROCESSES_SQL: &str = "
    SELECT pg_terminate_backend(pid)
    FROM pg_stat_activity
    WHERE pid = ANY ($1::int4[])
      AND state = 'idle'";

/// One row of the idle scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleProcessRecord {
    pub pid: i32,
}

/// Server-derived connection ceiling and when it was read
#[derive(Debug, Clone, Copy)]
pub(crate) struct CachedMaxConnections {
    value: u32,
    fetched_at: Instant,
}

impl ServerlessConnection {
    /// Terminate idle sessions of the caller's user/database pair when
    /// utilization is above the configured threshold.
    ///
    /// Returns the number of sessions selected for termination; zero when
    /// utilization is at or below the threshold.
    #[tracing::instrument(skip(self), fields(user = %self.credential.user, database = %self.credential.database))]
    pub async fn clean(&mut self) -> Result<usize> {
        let count = self.process_count().await?;
        self.diagnostics.info(DiagnosticEvent::ProcessCount { count });

        let ceiling = self.max_connections().await?;
        let threshold = f64::from(ceiling) * self.config.connection_utilization_threshold;
        let over_threshold = (count as f64) > threshold;
        if !over_threshold {
            tracing::debug!(count, threshold, "utilization below threshold, nothing to reap");
            return Ok(0);
        }

        let pids: Vec<i32> = self
            .idle_processes()
            .await?
            .into_iter()
            .map(|record| record.pid)
            .collect();
        self.kill_processes(&pids).await?;

        self.diagnostics
            .info(DiagnosticEvent::Killed { count: pids.len() });
        Ok(pids.len())
    }

    /// Number of sessions open for the caller's user/database pair
    pub async fn process_count(&mut self) -> Result<i64> {
        let params = [
            Value::from(self.credential.database.as_str()),
            Value::from(self.credential.user.as_str()),
        ];
        let result = self.query(PROCESS_COUNT_SQL, &params).await?;

        result
            .scalar()
            .and_then(Value::as_i64)
            .ok_or_else(|| SlsError::UnexpectedResult("process count query returned no count".into()))
    }

    /// Connection ceiling used for the utilization check.
    ///
    /// The configured value when `manual_max_connections` is set; otherwise
    /// the server's `max_connections`, re-read once the poll interval has
    /// elapsed.
    pub async fn max_connections(&mut self) -> Result<u32> {
        if self.config.manual_max_connections {
            return Ok(self.config.max_connections);
        }

        if let Some(cached) = self.max_connections_cache {
            if cached.fetched_at.elapsed() < self.config.max_connections_poll_interval() {
                return Ok(cached.value);
            }
        }

        let result = self.query(MAX_CONNECTIONS_SQL, &[]).await?;
        let value = result
            .scalar()
            .and_then(Value::as_i64)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                SlsError::UnexpectedResult("max_connections setting is missing or invalid".into())
            })?;

        self.max_connections_cache = Some(CachedMaxConnections {
            value,
            fetched_at: Instant::now(),
        });
        self.diagnostics
            .info(DiagnosticEvent::MaxConnections { value });
        Ok(value)
    }

    /// Idle sessions of the caller's pair whose idle time exceeds
    /// `min_idle_seconds`, at most `max_idle_connections_to_kill` of them.
    pub async fn idle_processes(&mut self) -> Result<Vec<IdleProcessRecord>> {
        let limit = self.config.max_idle_connections_to_kill;
        let params = [
            Value::from(self.credential.user.as_str()),
            Value::from(self.credential.database.as_str()),
            Value::Float64(self.config.min_idle_seconds),
            Value::from(limit.map(i64::from)),
        ];
        let result = self.query(IDLE_PROCESSES_SQL, &params).await?;

        let mut records = result
            .rows
            .iter()
            .map(|row| {
                row.get(0)
                    .and_then(Value::as_i64)
                    .and_then(|pid| i32::try_from(pid).ok())
                    .map(|pid| IdleProcessRecord { pid })
                    .ok_or_else(|| {
                        SlsError::UnexpectedResult("idle process row without a pid".into())
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(limit) = limit {
            records.truncate(limit as usize);
        }
        Ok(records)
    }

    /// Terminate the given sessions if they are still idle.
    ///
    /// Sessions that have already gone away are skipped by the server.
    pub async fn kill_processes(&mut self, pids: &[i32]) -> Result<()> {
        if pids.is_empty() {
            return Ok(());
        }

        tracing::debug!(?pids, "terminating idle sessions");
        self.execute(KILL_PROCESSES_SQL, &[Value::from(pids.to_vec())])
            .await?;
        Ok(())
    }
}
