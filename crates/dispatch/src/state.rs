//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::DispatchConfig;
use crate::services::{ResendClient, ResendError};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like the database pool, configuration, and the email
/// provider client.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: DispatchConfig,
    pool: PgPool,
    mailer: ResendClient,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Errors
    ///
    /// Returns an error if the Resend client cannot be built.
    pub fn new(config: DispatchConfig, pool: PgPool) -> Result<Self, ResendError> {
        let mailer = ResendClient::new(&config.resend)?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                mailer,
            }),
        })
    }

    /// Get a reference to the dispatcher configuration.
    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Get a reference to the Resend email client.
    #[must_use]
    pub fn mailer(&self) -> &ResendClient {
        &self.inner.mailer
    }
}
