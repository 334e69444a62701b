use crate::{config::AppConfig, ingest::CoverageService};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub coverage: CoverageService,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, coverage: CoverageService) -> Self {
        Self { config, coverage }
    }
}
