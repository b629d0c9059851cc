//! Configuration management
//!
//! Provides the immutable configuration the loss engine is built from, with
//! TOML and JSON round-trips.

use serde::{Deserialize, Serialize};

use crate::data::{CropMode, MAX_PROFILE_LENGTH, PROFILE_PAD_VALUE};
use crate::model::NormKind;
use crate::training::GanLossKind;

/// Loss engine configuration, fixed at construction.
///
/// The enumerated options (loss variant, crop mode, normalization kind) are
/// typed, so unrecognized values fail when a config file is parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossConfig {
    /// Training step at which the discriminator becomes active
    pub disc_start: i64,
    /// Initial value of the learned log-variance
    pub logvar_init: f64,
    /// Pixel reconstruction loss weight
    pub pixel_weight: f64,
    /// Weight of the optional perceptual distance term
    pub perceptual_weight: f64,
    /// Number of discriminator downsampling layers
    pub disc_num_layers: i64,
    /// Discriminator input channel count
    pub disc_in_channels: i64,
    /// Static discriminator factor scaling the adversarial terms
    pub disc_factor: f64,
    /// Scaling applied to the adaptive weight
    pub disc_weight: f64,
    /// Discriminator loss variant
    pub disc_loss: GanLossKind,
    /// Normalization layer kind inside the discriminator
    pub disc_norm: NormKind,
    /// Discriminator base feature width
    pub disc_ndf: i64,
    /// Apply a sigmoid to the discriminator head
    pub disc_sigmoid: bool,
    /// Concatenate a conditioning tensor before discriminating
    pub disc_conditional: bool,
    /// Use the 3D discriminator variant
    pub disc_3d: bool,
    /// Reduce volumes to 2D profiles before discriminating
    pub crop_to_profiles: bool,
    /// Profile reduction mode
    pub crop_mode: CropMode,
    /// Fixed path length for padded profiles
    pub max_profile_length: i64,
    /// Sentinel value for the padded profile tail
    pub profile_pad_value: f64,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            disc_start: 50001,
            logvar_init: 0.0,
            pixel_weight: 1.0,
            perceptual_weight: 1.0,
            disc_num_layers: 3,
            disc_in_channels: 3,
            disc_factor: 1.0,
            disc_weight: 1.0,
            disc_loss: GanLossKind::Hinge,
            disc_norm: NormKind::Batch,
            disc_ndf: 64,
            disc_sigmoid: false,
            disc_conditional: false,
            disc_3d: false,
            crop_to_profiles: false,
            crop_mode: CropMode::AvgDimensions,
            max_profile_length: MAX_PROFILE_LENGTH,
            profile_pad_value: PROFILE_PAD_VALUE,
        }
    }
}

impl LossConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML file
    pub fn from_toml(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LossConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_toml(&self, path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LossConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn save_json(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.disc_start < 0 {
            anyhow::bail!("Discriminator start step must be >= 0");
        }
        if self.disc_num_layers <= 0 {
            anyhow::bail!("Discriminator layer count must be > 0");
        }
        if self.disc_in_channels <= 0 {
            anyhow::bail!("Discriminator input channels must be > 0");
        }
        if self.disc_ndf <= 0 {
            anyhow::bail!("Discriminator base feature width must be > 0");
        }
        if self.max_profile_length <= 0 {
            anyhow::bail!("Maximum profile length must be > 0");
        }
        Ok(())
    }
}
