use super::estimate_units;
use crate::config::GenerationConfig;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tollgate_cache::{CacheError, Generation, GenerationProvider, ResourceTier, Result};

/// Runs an external CLI once per call: `<command> --print --model <model> <prompt>`
#[derive(Clone)]
pub struct CommandProvider {
    command: PathBuf,
    working_dir: PathBuf,
    models: BTreeMap<ResourceTier, String>,
}

impl CommandProvider {
    pub fn new(command: PathBuf, working_dir: PathBuf) -> Self {
        Self {
            command,
            working_dir,
            models: GenerationConfig::default().models,
        }
    }

    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            command: config.command.clone(),
            working_dir: config
                .working_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(".")),
            models: config.models.clone(),
        }
    }

    pub fn with_model(mut self, tier: ResourceTier, model: impl Into<String>) -> Self {
        self.models.insert(tier, model.into());
        self
    }

    fn model_for(&self, tier: ResourceTier) -> Result<&str> {
        self.models
            .get(&tier)
            .map(String::as_str)
            .ok_or_else(|| CacheError::ConfigError(format!("no model for resource tier {}", tier)))
    }
}

#[async_trait]
impl GenerationProvider for CommandProvider {
    fn name(&self) -> &str {
        "command"
    }

    async fn generate(&self, prompt: &str, tier: ResourceTier) -> Result<Generation> {
        let mut cmd = Command::new(&self.command);
        cmd.current_dir(&self.working_dir);
        cmd.arg("--print");
        cmd.arg("--model").arg(self.model_for(tier)?);

        // Prompt is positional and must be last
        cmd.arg(prompt);

        // Close stdin so the child never blocks waiting for input
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!("Running generation command: {:?}", self.command);

        let output = cmd.output().await.map_err(|e| {
            CacheError::GenerationFailed(format!(
                "failed to execute {}: {}",
                self.command.display(),
                e
            ))
        })?;

        let response = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(CacheError::GenerationFailed(format!(
                "{} exited with code {}: {}",
                self.command.display(),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        if !stderr.is_empty() {
            tracing::warn!("generation command stderr: {}", stderr);
        }

        Ok(Generation {
            units_in: estimate_units(prompt),
            units_out: estimate_units(&response),
            text: response,
        })
    }
}
