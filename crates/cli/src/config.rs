use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};
use coordinator::CoordinatorConfig;
use serde::Deserialize;

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub engine: EngineSettings,
    pub replay: ReplaySettings,
    pub log: LogSettings,
}

#[derive(Deserialize, Clone, Debug)]
pub struct EngineSettings {
    pub max_depth: usize,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ReplaySettings {
    pub fixture: String,
    pub latency_ms: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct LogSettings {
    pub filter: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        defaults()?
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::File::with_name(&format!("config.{}", run_mode)).required(false))
            .add_source(
                config::Environment::with_prefix("THREADVOTE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl From<EngineSettings> for CoordinatorConfig {
    fn from(engine: EngineSettings) -> Self {
        Self {
            max_depth: engine.max_depth,
            command_buffer: engine.command_buffer,
            event_buffer: engine.event_buffer,
        }
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    config::Config::builder()
        .set_default("engine.max_depth", 3)?
        .set_default("engine.command_buffer", 100)?
        .set_default("engine.event_buffer", 100)?
        .set_default("replay.fixture", "fixtures/demo.json")?
        .set_default("replay.latency_ms", 0)?
        .set_default("log.filter", "info")
}
