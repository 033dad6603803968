mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    GatewaySettings, LoggingSettings, MqttSettings, PersistenceSettings, ReconnectSettings,
    ServerSettings, Settings,
};

/// Loads `config/default.toml` (optional) and `SCRIBE__SECTION__KEY`
/// environment variables, then merges them over the defaults and validates
/// the result.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("SCRIBE")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = Settings::merge(partial);
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests;
