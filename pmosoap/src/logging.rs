//! Initialisation de la journalisation `tracing`
//!
//! Le niveau maximal est porté par un filtre rechargeable : il peut être
//! changé à chaud via [`LogHandle::set_max_level`]. La sortie console est
//! optionnelle (`host.logger.enable_console`).

use anyhow::{Result, anyhow};
use pmoconfig::Config;
use tracing::Level;
use tracing_subscriber::{
    Layer, Registry,
    filter::LevelFilter,
    layer::SubscriberExt,
    reload,
    util::SubscriberInitExt,
};

/// Poignée sur le filtre de niveau du subscriber global
#[derive(Clone)]
pub struct LogHandle {
    reload_handle: reload::Handle<LevelFilter, Registry>,
}

impl LogHandle {
    /// Change le niveau maximal des événements émis
    pub fn set_max_level(&self, level: Level) -> Result<()> {
        self.reload_handle
            .reload(LevelFilter::from_level(level))
            .map_err(|e| anyhow!("Failed to reload log level filter: {}", e))
    }

    /// Niveau maximal actuellement appliqué
    pub fn max_level(&self) -> Option<LevelFilter> {
        self.reload_handle.clone_current()
    }
}

/// Convertit un nom de niveau (`"info"`, `"DEBUG"`...) en `Level`
pub fn parse_level(name: &str) -> Option<Level> {
    match name.trim().to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" | "WARNING" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

/// Installe le subscriber global d'après la section `host.logger`
///
/// # Arguments
///
/// * `config` - Configuration fournissant `min_level` et `enable_console`
///
/// # Returns
///
/// La poignée de rechargement du niveau, ou une erreur si un subscriber
/// global est déjà installé
pub fn init_logging(config: &Config) -> Result<LogHandle> {
    let min_level = config.get_log_min_level()?;
    let parsed = parse_level(&min_level);
    let level = parsed.unwrap_or(Level::INFO);
    let enable_console = config.get_log_enable_console()?;

    let (filter, reload_handle) = reload::Layer::new(LevelFilter::from_level(level));
    let console = enable_console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .boxed()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .try_init()
        .map_err(|e| anyhow!("Logging already initialised: {}", e))?;

    if parsed.is_none() {
        tracing::warn!(%min_level, "Unknown log level, using INFO");
    }
    tracing::info!(%level, enable_console, "Logging initialised");
    Ok(LogHandle { reload_handle })
}
