use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

/// PostgreSQL session settings applied around bulk loads.
pub struct PgConfig;

impl PgConfig {
    /// Apply per-batch settings at transaction level.
    ///
    /// The statement timeout mirrors the client-side batch timeout so the
    /// server stops work the client has already given up on.
    pub async fn apply_batch_settings(
        tx: &mut Transaction<'_, Postgres>,
        timeout: Duration,
        synchronous_commit: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(format!("{}ms", timeout.as_millis()))
            .execute(&mut **tx)
            .await?;

        if !synchronous_commit {
            // Still durable via WAL, acknowledged before the flush.
            sqlx::query("SET LOCAL synchronous_commit = 'off'")
                .execute(&mut **tx)
                .await?;
        }

        Ok(())
    }

    /// Check current configuration settings
    pub async fn check_config(pool: &PgPool) -> Result<ConfigSnapshot, sqlx::Error> {
        let server_version: (String,) = sqlx::query_as("SHOW server_version")
            .fetch_one(pool)
            .await?;

        let max_connections: (String,) = sqlx::query_as("SHOW max_connections")
            .fetch_one(pool)
            .await?;

        let work_mem: (String,) = sqlx::query_as("SHOW work_mem").fetch_one(pool).await?;

        let synchronous_commit: (String,) = sqlx::query_as("SHOW synchronous_commit")
            .fetch_one(pool)
            .await?;

        Ok(ConfigSnapshot {
            server_version: server_version.0,
            max_connections: max_connections.0,
            work_mem: work_mem.0,
            synchronous_commit: synchronous_commit.0,
        })
    }
}

/// Snapshot of current PostgreSQL configuration
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub server_version: String,
    pub max_connections: String,
    pub work_mem: String,
    pub synchronous_commit: String,
}

impl ConfigSnapshot {
    /// Whether `connections` concurrent sessions fit under the server limit.
    /// Unknown limits are assumed to fit.
    pub fn fits_connections(&self, connections: u32) -> bool {
        self.max_connections
            .trim()
            .parse::<u32>()
            .map(|limit| connections < limit)
            .unwrap_or(true)
    }
}

impl std::fmt::Display for ConfigSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "PostgreSQL Configuration:")?;
        writeln!(f, "  server_version: {}", self.server_version)?;
        writeln!(f, "  max_connections: {}", self.max_connections)?;
        writeln!(f, "  work_mem: {}", self.work_mem)?;
        writeln!(f, "  synchronous_commit: {}", self.synchronous_commit)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(max_connections: &str) -> ConfigSnapshot {
        ConfigSnapshot {
            server_version: "16.4".to_string(),
            max_connections: max_connections.to_string(),
            work_mem: "4MB".to_string(),
            synchronous_commit: "on".to_string(),
        }
    }

    #[test]
    fn test_config_snapshot_display() {
        let display = format!("{}", snapshot("100"));
        assert!(display.contains("max_connections: 100"));
        assert!(display.contains("server_version: 16.4"));
    }

    #[test]
    fn connection_limit_check() {
        assert!(snapshot("100").fits_connections(11));
        assert!(!snapshot("10").fits_connections(11));
        assert!(snapshot("unknown").fits_connections(500));
    }
}
