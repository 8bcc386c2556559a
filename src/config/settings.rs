use serde::Deserialize;

use crate::amqp::ProtoVersion;

/// Top-level configuration settings for the application.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub storage: StorageSettings,
    pub log: LogSettings,
}

/// Delivery-core settings.
///
/// Prefetch defaults are applied to the QoS of every new channel; zero means
/// unlimited. `durable_queues` are declared at startup, before restore.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerSettings {
    pub protocol_version: ProtoVersion,
    pub durable_queues: Vec<String>,
    pub default_prefetch_count: u16,
    pub default_prefetch_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sled,
    Memory,
}

/// Where durable messages are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from
/// `Settings::default()`.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub storage: Option<PartialStorageSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialBrokerSettings {
    /// `"amqp-0-9-1"` or `"amqp-rabbit"`.
    pub protocol_version: Option<String>,
    pub durable_queues: Option<Vec<String>>,
    pub default_prefetch_count: Option<u16>,
    pub default_prefetch_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialStorageSettings {
    pub backend: Option<StorageBackend>,
    pub path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                protocol_version: ProtoVersion::default(),
                durable_queues: Vec::new(),
                default_prefetch_count: 0,
                default_prefetch_size: 0,
            },
            storage: StorageSettings {
                backend: StorageBackend::Sled,
                path: "mqcore_db".to_string(),
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
