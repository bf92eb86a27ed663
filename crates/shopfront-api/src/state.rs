//! Application state.

use std::sync::Arc;

use shopfront_firestore::{DocumentStore, FirestoreClient};
use shopfront_security::{SecurityConfig, SecurityServices};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn DocumentStore>,
    pub security: SecurityServices,
}

impl AppState {
    /// Create state backed by Firestore, configured from the environment.
    pub fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let firestore = FirestoreClient::from_env()?;
        Self::with_store(config, Arc::new(firestore), &SecurityConfig::from_env())
    }

    /// Create state over any document store.
    pub fn with_store(
        config: ApiConfig,
        store: Arc<dyn DocumentStore>,
        security_config: &SecurityConfig,
    ) -> anyhow::Result<Self> {
        let security = SecurityServices::new(Arc::clone(&store), security_config)?;

        Ok(Self {
            config,
            store,
            security,
        })
    }
}
