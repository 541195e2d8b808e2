use std::sync::Arc;

use crate::application::engine::Engine;
use crate::infra::db::PostgresRepositories;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
    /// Probed by `/health`; absent when running on in-memory repositories.
    pub db: Option<Arc<PostgresRepositories>>,
}

impl ApiState {
    pub fn new(engine: Arc<Engine>, db: Option<Arc<PostgresRepositories>>) -> Self {
        Self { engine, db }
    }
}
