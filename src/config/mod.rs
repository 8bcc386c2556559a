pub mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    BrokerSettings, LogSettings, Settings, StorageBackend, StorageSettings,
};

/// Prefix of environment overrides, e.g. `MQCORE__STORAGE__PATH`.
pub const ENV_PREFIX: &str = "MQCORE";

/// Loads the configuration from `config/default` and environment variables,
/// merged over default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Same as `load_config` but reads the optional file at `path` (any format
/// the `config` crate recognises by extension).
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("broker.durable_queues"),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    merge(partial)
}

fn merge(partial: PartialSettings) -> Result<Settings, ConfigError> {
    let default = Settings::default();
    let broker = partial.broker.unwrap_or_default();
    let storage = partial.storage.unwrap_or_default();
    let log = partial.log.unwrap_or_default();

    let protocol_version = match broker.protocol_version {
        Some(v) => v
            .parse()
            .map_err(|e| ConfigError::Message(format!("broker.protocol_version: {e}")))?,
        None => default.broker.protocol_version,
    };

    Ok(Settings {
        broker: BrokerSettings {
            protocol_version,
            durable_queues: broker
                .durable_queues
                .unwrap_or(default.broker.durable_queues),
            default_prefetch_count: broker
                .default_prefetch_count
                .unwrap_or(default.broker.default_prefetch_count),
            default_prefetch_size: broker
                .default_prefetch_size
                .unwrap_or(default.broker.default_prefetch_size),
        },
        storage: StorageSettings {
            backend: storage.backend.unwrap_or(default.storage.backend),
            path: storage.path.unwrap_or(default.storage.path),
        },
        log: LogSettings {
            level: log.level.unwrap_or(default.log.level),
        },
    })
}
