use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::storage::DiskStorage;
use crate::users::{memory::MemoryUserRepo, repo::PgUserRepo, UserRepo};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepo>,
    pub config: Arc<AppConfig>,
    pub storage: Arc<DiskStorage>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let users: Arc<dyn UserRepo> = if config.database_url.starts_with("memory:") {
            warn!("using the in-memory user store; accounts are lost on restart");
            Arc::new(MemoryUserRepo::new())
        } else {
            let db = PgPoolOptions::new()
                .max_connections(10)
                .connect(&config.database_url)
                .await
                .context("connect to database")?;

            if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
                warn!(error = %e, "migration failed; continuing");
            }
            info!("connected to postgres");
            Arc::new(PgUserRepo::new(db))
        };

        let storage = Arc::new(DiskStorage::init(&config.upload.dir).await?);

        Ok(Self {
            users,
            config,
            storage,
        })
    }

    pub fn from_parts(
        users: Arc<dyn UserRepo>,
        config: Arc<AppConfig>,
        storage: Arc<DiskStorage>,
    ) -> Self {
        Self {
            users,
            config,
            storage,
        }
    }
}
