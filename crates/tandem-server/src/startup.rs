//! Process startup: settings, logging and the metrics recorder.
//!
//! A host binary calls [`TandemServer::bootstrap`] once, then
//! [`TandemServer::listen`].

use std::path::Path;
use std::sync::Arc;

use metrics_exporter_prometheus::BuildError;
use tandem_core::logging::{init_json_subscriber, init_subscriber};
use tandem_settings::{
    LoggingSettings, SettingsError, TandemSettings, load_settings_from_path, settings_path,
};
use tracing::info;

use crate::metrics::install_recorder;
use crate::server::TandemServer;
use crate::workspace::PipelineFactory;

/// Errors raised while starting the server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Settings could not be loaded.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// The global metrics recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] BuildError),
}

/// Install the global tracing subscriber described by `settings`.
pub fn init_logging(settings: &LoggingSettings) {
    if settings.json {
        init_json_subscriber(&settings.level);
    } else {
        init_subscriber(&settings.level);
    }
}

impl TandemServer {
    /// Load `~/.tandem/settings.json` and start the server on it.
    pub fn bootstrap(factory: Arc<dyn PipelineFactory>) -> Result<Self, StartupError> {
        Self::bootstrap_from_path(&settings_path(), factory)
    }

    /// Load settings from `path` (plus `TANDEM_*` overrides), install
    /// logging and the global Prometheus recorder, and build the server.
    ///
    /// Fails when a global recorder is already installed.
    pub fn bootstrap_from_path(
        path: &Path,
        factory: Arc<dyn PipelineFactory>,
    ) -> Result<Self, StartupError> {
        let settings = load_settings_from_path(path)?;
        Self::from_settings(settings, factory)
    }

    /// Install logging and the global Prometheus recorder for `settings`.
    pub fn from_settings(
        settings: TandemSettings,
        factory: Arc<dyn PipelineFactory>,
    ) -> Result<Self, StartupError> {
        init_logging(&settings.logging);
        let metrics = install_recorder()?;
        info!(
            host = %settings.server.host,
            port = settings.server.port,
            compact_threshold = settings.session.broadcast_compact_threshold,
            "tandem server configured"
        );
        Ok(Self::new(settings, factory, metrics))
    }
}
