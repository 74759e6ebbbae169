//! Scanner configuration management

use crate::capture_loop::CapturePolicy;
use crate::dispatch::ResultVariant;
use crate::engine::OpenOptions;
use crate::scanner::ScannerSettings;
use crate::session::CaptureSession;
use crate::usb::{default_filters, validate_filter};
use anyhow::{Context, Result, anyhow};
use common::DEFAULT_QUEUE_CAPACITY;
use protocol::{
    CaptureOptions, Failure, FingerQuality, ImageResolution, ImageType, PropertyAccess,
    PropertyId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub scanner: CoreSettings,
    pub usb: UsbSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
    /// Property values applied to every session after open, by table key
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreSettings {
    pub log_level: String,
    /// Capacity of each session's event queue
    #[serde(default = "CoreSettings::default_queue_capacity")]
    pub queue_capacity: usize,
    /// Which result callback ends a capture (plain or extended)
    #[serde(default)]
    pub result_variant: ResultVariant,
    /// Uniformity mask file passed to the engine on open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniformity_mask_path: Option<String>,
}

impl CoreSettings {
    fn default_queue_capacity() -> usize {
        DEFAULT_QUEUE_CAPACITY
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID allow-list, e.g. "0x113f:0x1100" or "0x1fba:*"
    pub filters: Vec<String>,
}

/// Consumer capture policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    #[serde(default)]
    pub image_type: ImageType,
    /// Pixels per inch, 500 or 1000
    #[serde(default)]
    pub resolution: ImageResolution,
    /// Option flag names: auto_contrast, auto_capture, ignore_finger_count
    #[serde(default = "CaptureSettings::default_options")]
    pub options: Vec<String>,
    /// Accepted finger qualities; empty accepts any result
    #[serde(default = "CaptureSettings::default_accept")]
    pub accept: Vec<FingerQuality>,
    #[serde(default = "CaptureSettings::default_max_attempts")]
    pub max_attempts: u32,
    /// Per-attempt timeout in seconds (unset = wait for the engine)
    #[serde(default)]
    pub attempt_timeout_secs: Option<u64>,
    #[serde(default)]
    pub cancel_on_non_finger: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            image_type: ImageType::FlatSingleFinger,
            resolution: ImageResolution::Ppi500,
            options: Self::default_options(),
            accept: Self::default_accept(),
            max_attempts: Self::default_max_attempts(),
            attempt_timeout_secs: None,
            cancel_on_non_finger: false,
        }
    }
}

impl CaptureSettings {
    fn default_options() -> Vec<String> {
        vec!["auto_contrast".to_string(), "auto_capture".to_string()]
    }

    fn default_accept() -> Vec<FingerQuality> {
        vec![FingerQuality::Good]
    }

    fn default_max_attempts() -> u32 {
        3
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scanner: CoreSettings {
                log_level: "info".to_string(),
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
                result_variant: ResultVariant::default(),
                uniformity_mask_path: None,
            },
            usb: UsbSettings {
                filters: default_filters(),
            },
            capture: CaptureSettings::default(),
            properties: BTreeMap::new(),
        }
    }
}

impl ScannerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/fpscan/scanner.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ScannerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("fpscan").join("scanner.toml")
        } else {
            PathBuf::from(".config/fpscan/scanner.toml")
        }
    }

    /// Expand `~` in a user-supplied path
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).as_ref())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.scanner.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.scanner.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.scanner.queue_capacity == 0 {
            return Err(anyhow!("queue_capacity must be greater than zero"));
        }

        for filter in &self.usb.filters {
            validate_filter(filter)?;
        }

        if self.capture.max_attempts == 0 {
            return Err(anyhow!("capture.max_attempts must be at least 1"));
        }
        if self.capture.image_type == ImageType::None {
            return Err(anyhow!("capture.image_type must name a capture type"));
        }
        CaptureOptions::from_names(&self.capture.options).context("Invalid capture.options")?;

        for (key, value) in &self.properties {
            let id = PropertyId::from_key(key)
                .ok_or_else(|| anyhow!("Unknown property '{}' in [properties]", key))?;
            let spec = id.spec();
            if spec.access != PropertyAccess::GetSet {
                return Err(anyhow!("Property '{}' cannot be set from configuration", key));
            }
            spec.normalize(value)
                .map_err(|failure| anyhow!("Invalid value for '{}': {}", key, failure))?;
        }

        Ok(())
    }

    /// Core settings for [`Scanner::new`](crate::Scanner::new)
    pub fn scanner_settings(&self) -> ScannerSettings {
        ScannerSettings {
            queue_capacity: self.scanner.queue_capacity,
            result_variant: self.scanner.result_variant,
        }
    }

    /// Options for [`Scanner::open_with`](crate::Scanner::open_with)
    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            uniformity_mask_path: self
                .scanner
                .uniformity_mask_path
                .as_deref()
                .map(Self::expand_path),
        }
    }

    /// Capture policy from the `[capture]` section
    pub fn capture_policy(&self) -> Result<CapturePolicy> {
        let capture = &self.capture;
        Ok(CapturePolicy {
            image_type: capture.image_type,
            resolution: capture.resolution,
            options: CaptureOptions::from_names(&capture.options)
                .context("Invalid capture.options")?,
            accept: capture.accept.clone(),
            max_attempts: capture.max_attempts,
            attempt_timeout: capture.attempt_timeout_secs.map(Duration::from_secs),
            cancel_on_non_finger: capture.cancel_on_non_finger,
        })
    }

    /// Write the `[properties]` values to an open session, in key order
    pub fn apply_properties(&self, session: &CaptureSession) -> std::result::Result<(), Failure> {
        for (key, value) in &self.properties {
            session.set_property_by_key(key, value).map_err(|failure| {
                tracing::warn!(property = %key, %failure, "Configured property rejected");
                failure
            })?;
        }
        Ok(())
    }
}
