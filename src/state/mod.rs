use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::config::{AppPaths, ConfigService, Settings};
use crate::pipeline::QaPipeline;

pub mod error;

use error::InitializationError;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub settings: Arc<Settings>,
    pub pipeline: Arc<QaPipeline>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Loads `config.yml` + `secrets.yaml` under `paths` with environment
    /// overrides, and wires the pipeline against the configured services.
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let settings = config
            .load_settings()
            .map_err(InitializationError::Config)?;

        let uploads_dir = paths.resolve_uploads_dir(settings.storage.uploads_dir.as_deref());
        tokio::fs::create_dir_all(&uploads_dir)
            .await
            .map_err(|e| InitializationError::Pipeline(e.into()))?;

        let pipeline = QaPipeline::from_settings(&settings, uploads_dir)
            .map_err(InitializationError::Pipeline)?;

        Ok(Self::new(paths, config, settings, pipeline))
    }

    pub fn new(
        paths: Arc<AppPaths>,
        config: ConfigService,
        settings: Settings,
        pipeline: QaPipeline,
    ) -> Arc<Self> {
        Arc::new(Self {
            paths,
            config,
            settings: Arc::new(settings),
            pipeline: Arc::new(pipeline),
            started_at: Utc::now(),
        })
    }
}
