//! The `config` module loads runtime settings.
//!
//! Values come from an optional `config/default` file (any format the
//! `config` crate understands) overridden by `MQDB_`-prefixed environment
//! variables, with `__` between section and key, e.g.
//! `MQDB_BROKER__MAX_INFLIGHT=10`. Anything left unset falls back to
//! `Settings::default()`.

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{BrokerSettings, LogSettings, PersistenceSettings, Settings, SysSettings};

/// Loads the configuration from `config/default` and the environment.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Like `load_config`, reading the optional file at `path` (extension may
/// be omitted).
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("MQDB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let partial: PartialSettings = config.try_deserialize()?;
    Ok(partial.merge())
}

#[cfg(test)]
mod tests;
