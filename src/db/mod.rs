use std::sync::LazyLock;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::util::env::{self, EnvErr};

pub mod models;
pub mod repositories;

pub mod prelude {
    pub use crate::db::{PgError, PgStore, db_pool, migrate};

    pub use crate::db::models::ledger::{EventType, LedgerEntry, NewLedgerEntry};
    pub use crate::db::models::snapshot::{MetricSnapshot, SnapshotKey};
    pub use crate::db::models::{CampaignId, CompanyId, CreatorId, Platform, PostId};

    pub use crate::db::repositories::Tx;
}

static DB_POOL: LazyLock<OnceCell<Db>> = LazyLock::new(OnceCell::new);
pub async fn db_pool() -> PgResult<&'static PgPool> {
    Ok(&DB_POOL
        .get_or_try_init(|| async { Db::new_pool().await })
        .await?
        .pool)
}

struct Db {
    pool: PgPool,
}

impl Db {
    async fn new_pool() -> PgResult<Self> {
        let env = env::env().await?;
        let pool = PgPoolOptions::new()
            .max_connections(env.max_connections)
            .connect(&env.database_url)
            .await?;

        Ok(Self { pool })
    }
}

pub async fn migrate(pool: &PgPool) -> PgResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("database migrations applied");
    Ok(())
}

/// Postgres implementation of every storage seam in [`crate::store`]
#[derive(Debug, Clone, Copy)]
pub struct PgStore {
    pool: &'static PgPool,
}

impl PgStore {
    pub fn new(pool: &'static PgPool) -> Self {
        Self { pool }
    }

    /// Uses the shared process pool, creating it on first call
    pub async fn connect() -> PgResult<Self> {
        Ok(Self::new(db_pool().await?))
    }

    pub fn pool(&self) -> &'static PgPool {
        self.pool
    }
}

pub type PgResult<T> = core::result::Result<T, PgError>;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum PgError {
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error(transparent)]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    EnvError(#[from] EnvErr),
}
