use crate::config::Config;
use crate::error::AppError;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::time::Duration;
use tokio_postgres::{Config as PgConfig, NoTls};

const SCHEMA: &str = include_str!("../migrations/0001_chat_schema.sql");

/// Build a deadpool-postgres pool and verify one connection before returning it.
pub async fn create_pool(
    database_url: &str,
    max_connections: usize,
    connect_timeout: Duration,
) -> Result<Pool, AppError> {
    tracing::debug!(
        max_connections,
        verify_timeout_secs = connect_timeout.as_secs(),
        "creating database pool"
    );

    let pg_config: PgConfig = database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| AppError::Config(format!("DATABASE_URL: {e}")))?;

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
    let pool = Pool::builder(mgr)
        .max_size(max_connections)
        .build()
        .map_err(|e| AppError::StartServer(format!("db pool: {e}")))?;

    // Verify connection with connect timeout
    match tokio::time::timeout(connect_timeout, async {
        let client = pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok::<(), AppError>(())
    })
    .await
    {
        Ok(Ok(())) => {
            tracing::info!("database pool created and verified");
            Ok(pool)
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "database pool verification failed");
            Err(e)
        }
        Err(_) => {
            tracing::error!(
                timeout_secs = connect_timeout.as_secs(),
                "timed out verifying database pool"
            );
            Err(AppError::StartServer("database connect timeout".into()))
        }
    }
}

/// Apply the chat schema. Every statement is idempotent.
pub async fn run_migrations(pool: &Pool) -> Result<(), AppError> {
    let client = pool.get().await?;
    client.batch_execute(SCHEMA).await?;
    tracing::info!("chat schema applied");
    Ok(())
}

pub async fn init_pool(config: &Config) -> Result<Pool, AppError> {
    let database_url = config
        .database_url
        .as_deref()
        .ok_or_else(|| AppError::Config("DATABASE_URL missing".into()))?;
    let pool = create_pool(
        database_url,
        config.db_max_connections,
        Duration::from_secs(config.db_connect_timeout_secs),
    )
    .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
