use std::sync::Arc;

use sqlx::PgPool;

use crate::{config::AppConfig, db::create_pool};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = create_pool(&config)?;

        Ok(Self {
            config: Arc::new(config),
            db_pool,
        })
    }
}
