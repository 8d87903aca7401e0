use serde::Deserialize;

use crate::broker::admission::Limits;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub sys: SysSettings,
    pub persistence: PersistenceSettings,
    pub log: LogSettings,
}

/// Delivery limits and retry timing.
///
/// A value of 0 for `max_inflight`, `max_queued` or `store_memory_limit`
/// removes that limit.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub max_inflight: usize,
    pub max_queued: usize,
    pub retry_interval_secs: u64,
    pub store_memory_limit: usize,
}

impl BrokerSettings {
    pub fn limits(&self) -> Limits {
        Limits {
            max_inflight: self.max_inflight,
            max_queued: self.max_queued,
            memory_limit: self.store_memory_limit,
        }
    }
}

/// `$SYS` publication. An interval of 0 turns it off.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SysSettings {
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PersistenceSettings {
    pub enabled: bool,
    pub path: String,
    pub autosave_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub sys: Option<PartialSysSettings>,
    pub persistence: Option<PartialPersistenceSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub max_inflight: Option<usize>,
    pub max_queued: Option<usize>,
    pub retry_interval_secs: Option<u64>,
    pub store_memory_limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialSysSettings {
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialPersistenceSettings {
    pub enabled: Option<bool>,
    pub path: Option<String>,
    pub autosave_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                max_inflight: 20,
                max_queued: 100,
                retry_interval_secs: 20,
                store_memory_limit: 0,
            },
            sys: SysSettings { interval_secs: 10 },
            persistence: PersistenceSettings {
                enabled: false,
                path: "mqdb_store".to_string(),
                autosave_interval_secs: 1800,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `Settings::default()`.
    pub fn merge(self) -> Settings {
        let default = Settings::default();
        Settings {
            broker: BrokerSettings {
                max_inflight: self
                    .broker
                    .as_ref()
                    .and_then(|b| b.max_inflight)
                    .unwrap_or(default.broker.max_inflight),
                max_queued: self
                    .broker
                    .as_ref()
                    .and_then(|b| b.max_queued)
                    .unwrap_or(default.broker.max_queued),
                retry_interval_secs: self
                    .broker
                    .as_ref()
                    .and_then(|b| b.retry_interval_secs)
                    .unwrap_or(default.broker.retry_interval_secs),
                store_memory_limit: self
                    .broker
                    .as_ref()
                    .and_then(|b| b.store_memory_limit)
                    .unwrap_or(default.broker.store_memory_limit),
            },
            sys: SysSettings {
                interval_secs: self
                    .sys
                    .as_ref()
                    .and_then(|s| s.interval_secs)
                    .unwrap_or(default.sys.interval_secs),
            },
            persistence: PersistenceSettings {
                enabled: self
                    .persistence
                    .as_ref()
                    .and_then(|p| p.enabled)
                    .unwrap_or(default.persistence.enabled),
                path: self
                    .persistence
                    .as_ref()
                    .and_then(|p| p.path.clone())
                    .unwrap_or(default.persistence.path),
                autosave_interval_secs: self
                    .persistence
                    .as_ref()
                    .and_then(|p| p.autosave_interval_secs)
                    .unwrap_or(default.persistence.autosave_interval_secs),
            },
            log: LogSettings {
                level: self
                    .log
                    .and_then(|l| l.level)
                    .unwrap_or(default.log.level),
            },
        }
    }
}
