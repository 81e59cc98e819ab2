pub mod rest;

use crate::config::Config;
use crate::crypto::Cipher;
use crate::db::DbPool;
use crate::registry::NodeRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub registry: Arc<NodeRegistry>,
    pub cipher: Arc<Cipher>,
    pub config: Config,
}

impl AppState {
    pub fn new(db: DbPool, registry: Arc<NodeRegistry>, cipher: Arc<Cipher>, config: Config) -> Self {
        Self {
            db,
            registry,
            cipher,
            config,
        }
    }
}
