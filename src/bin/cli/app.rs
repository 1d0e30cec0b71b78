use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use wordwise_lib::config::EngineConfig;
use wordwise_lib::engine::{Command, LearningEngine, Response};
use wordwise_lib::persistence::StoreEvent;

use crate::output;
use crate::OutputFormat;

/// Engine opened for a single CLI invocation
pub struct App {
    pub config: EngineConfig,
    pub engine: LearningEngine,
}

impl App {
    /// Load the config and open the engine; must run inside the runtime
    pub fn new(config_path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => match EngineConfig::default_path() {
                Some(path) => EngineConfig::load(&path).context("Failed to load config")?,
                None => EngineConfig::default(),
            },
        };
        if data_dir.is_some() {
            config.data_dir = data_dir;
        }

        let engine = LearningEngine::open(&config).context("Failed to open data directory")?;
        Ok(Self { config, engine })
    }

    /// Dispatch one command, print the response and flush before exiting
    ///
    /// Returns false when the engine reported an error.
    pub async fn run(self, command: Command, format: &OutputFormat, use_color: bool) -> Result<bool> {
        let mut events = self.engine.subscribe_events();

        let response = self.engine.dispatch(command).await;
        output::print_response(&response, &self.config, format, use_color)?;

        self.engine.shutdown().await;

        while let Ok(event) = events.try_recv() {
            if let StoreEvent::DurabilityExhausted { key } = event {
                eprintln!(
                    "warning: '{}' could not be saved and was kept in the local backup",
                    key
                );
            }
        }

        Ok(!matches!(response, Response::Error { .. }))
    }
}
