//! Loss hyperparameter configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::{AnvilError, AnvilResult};
use crate::nn::losses::Reduction;

/// Hyperparameters shared by the energy-based losses
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    /// Reduction for the generator and discriminator losses. The
    /// pulling-away term always averages.
    pub reduction: Reduction,
    /// Hinge margin of the discriminator loss
    pub margin: f32,
    /// Weight of the pulling-away term
    pub pt_ratio: f32,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            reduction: Reduction::Mean,
            margin: 80.0,
            pt_ratio: 0.1,
        }
    }
}

impl LossConfig {
    pub fn validate(&self) -> AnvilResult<()> {
        if !self.margin.is_finite() || self.margin < 0.0 {
            return Err(AnvilError::ConfigurationError(format!(
                "margin must be a finite non-negative number, got {}",
                self.margin
            )));
        }
        if !self.pt_ratio.is_finite() {
            return Err(AnvilError::ConfigurationError(format!(
                "pt_ratio must be finite, got {}",
                self.pt_ratio
            )));
        }
        Ok(())
    }

    pub fn from_json(content: &str) -> AnvilResult<Self> {
        let config: LossConfig = serde_json::from_str(content)
            .map_err(|e| AnvilError::operation_error("config", &format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> AnvilResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AnvilError::operation_error("config", &format!("Failed to serialize config: {}", e)))
    }

    pub fn load_from_file(path: &Path) -> AnvilResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AnvilError::operation_error("config", &format!("Failed to read config file: {}", e)))?;
        let config = Self::from_json(&content)?;
        tracing::info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> AnvilResult<()> {
        std::fs::write(path, self.to_json()?)
            .map_err(|e| AnvilError::operation_error("config", &format!("Failed to write config file: {}", e)))?;
        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }
}
