//! Structured telemetry initialisation for the engine.
//!
//! Every engine module logs under one of the [`targets`], so a filter such as
//! `warn,embulk_engine::transfer=debug` isolates a single stage of a run.

use std::io::{self, IsTerminal};

use embulk_config::{Config, LogFormat};
use once_cell::sync::OnceCell;
use tracing::{Subscriber, info, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// `tracing` targets used across the engine and the plugin runtime.
pub mod targets {
    /// Bootstrap and shutdown lifecycle events.
    pub const HEALTH: &str = "embulk_engine::health";
    /// Checkpoint loads, saves, and removals.
    pub const RESUME_STORE: &str = "embulk_engine::resume_store";
    /// Partition planning and execution.
    pub const TRANSFER: &str = "embulk_engine::transfer";
    /// Subscriber installation.
    pub const TELEMETRY: &str = "embulk_engine::telemetry";
    /// Plugin resolution across sources.
    pub const PLUGIN_MANAGER: &str = "embulk_plugins::manager";
    /// Archive isolation and linking.
    pub const CLASS_LOADER: &str = "embulk_plugins::class_loader";

    /// Targets owned by the engine crate.
    pub const ENGINE: &[&str] = &[HEALTH, RESUME_STORE, TRANSFER, TELEMETRY];
}

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A directive in the configured log filter does not parse.
    #[error("invalid log filter directive '{directive}': {message}")]
    Filter {
        /// Offending directive.
        directive: String,
        /// Parser message.
        message: String,
    },
    /// The global subscriber could not be installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global `tracing` subscriber on the first call.
///
/// Later calls return a fresh [`TelemetryHandle`] without touching the global
/// state, even when their configuration differs.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for a malformed filter and
/// [`TelemetryError::Subscriber`] when another subscriber is already
/// installed.
///
/// # Examples
///
/// ```rust
/// use embulk_config::Config;
/// use embulk_engine::telemetry;
///
/// # fn main() -> Result<(), embulk_engine::TelemetryError> {
/// let config = Config::default();
/// let first = telemetry::initialise(&config)?;
/// let second = telemetry::initialise(&config)?;
/// drop(first);
/// drop(second);
/// # Ok(())
/// # }
/// ```
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|()| TelemetryHandle)
}

/// Builds the event filter for `spec`, naming the first directive that does
/// not parse.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for a malformed directive.
pub fn engine_filter(spec: &str) -> Result<EnvFilter, TelemetryError> {
    let directives = spec
        .split(',')
        .map(str::trim)
        .filter(|directive| !directive.is_empty());
    for directive in directives {
        directive
            .parse::<Directive>()
            .map_err(|error| TelemetryError::Filter {
                directive: directive.to_owned(),
                message: error.to_string(),
            })?;
    }
    EnvFilter::try_new(spec).map_err(|error| TelemetryError::Filter {
        directive: spec.to_owned(),
        message: error.to_string(),
    })
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = engine_filter(config.log_filter())?;

    let builder = |env_filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_writer(io::stderr)
            // Colour only when stderr is a terminal.
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)?;
    info!(
        target: targets::TELEMETRY,
        filter = config.log_filter(),
        format = %config.log_format(),
        "telemetry initialised"
    );
    Ok(())
}
