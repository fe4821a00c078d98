use std::sync::Arc;

use common::storage::db::SurrealDbClient;
use processing_pipeline::control::ControlSurface;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub control: ControlSurface,
    /// Protected routes reject every request while this is unset.
    pub api_key: Option<Arc<str>>,
}

impl ApiState {
    pub fn new(db: Arc<SurrealDbClient>, control: ControlSurface, api_key: Option<String>) -> Self {
        Self {
            db,
            control,
            api_key: api_key
                .filter(|key| !key.trim().is_empty())
                .map(Arc::from),
        }
    }
}
