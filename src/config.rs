use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::LoggingConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlipConfig {
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Base name of the exported file, `<slip_name>.png`
    pub slip_name: String,

    /// Extra multiplier on top of the device pixel ratio
    pub scale_multiplier: f64,

    pub device_pixel_ratio: f64,

    /// Pause before capture so the latest recompute is painted (ms)
    pub settle_delay_ms: u64,

    /// How long a landing page keeps its image resource alive (s)
    pub landing_grace_secs: u64,

    /// Use the built-in box painter as the primary renderer
    pub use_primary_renderer: bool,

    /// Where downloads land; defaults to the user's download directory
    pub download_dir: Option<PathBuf>,

    /// Root for per-export staging directories; defaults to the temp dir
    pub staging_dir: Option<PathBuf>,

    /// Identification string used for browser-family detection
    pub user_agent: Option<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            slip_name: "patti-note".to_string(),
            scale_multiplier: 2.0,
            device_pixel_ratio: 1.0,
            settle_delay_ms: 150,
            landing_grace_secs: 30,
            use_primary_renderer: true,
            download_dir: None,
            staging_dir: None,
            user_agent: None,
        }
    }
}

impl ExportConfig {
    pub fn file_name(&self) -> String {
        format!("{}.png", self.slip_name)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn landing_grace(&self) -> Duration {
        Duration::from_secs(self.landing_grace_secs)
    }

    pub fn resolved_download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn resolved_staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("patti-slip"))
    }
}

impl SlipConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow!("Failed to read config file: {}", e))?;

        let config: SlipConfig =
            toml::from_str(&content).map_err(|e| anyhow!("Failed to parse config file: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Override fields with `PATTI_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(name) = std::env::var("PATTI_SLIP_NAME") {
            if !name.trim().is_empty() {
                self.export.slip_name = name.trim().to_string();
            }
        }

        if let Ok(scale) = std::env::var("PATTI_SCALE") {
            if let Ok(value) = scale.parse::<f64>() {
                if value > 0.0 {
                    self.export.scale_multiplier = value;
                }
            }
        }

        if let Ok(dir) = std::env::var("PATTI_DOWNLOAD_DIR") {
            self.export.download_dir = Some(PathBuf::from(dir));
        }

        if let Ok(agent) = std::env::var("PATTI_USER_AGENT") {
            self.export.user_agent = Some(agent);
        }

        if let Ok(level) = std::env::var("PATTI_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let name = &self.export.slip_name;
        if name.trim().is_empty() {
            return Err(anyhow!("export.slip_name must not be empty"));
        }
        // Becomes a file name under the download and staging dirs
        if name.contains(['/', '\\', '\0']) || name.contains("..") {
            return Err(anyhow!("export.slip_name must be a plain file name, got {:?}", name));
        }
        if !(self.export.scale_multiplier > 0.0) || !(self.export.device_pixel_ratio > 0.0) {
            return Err(anyhow!("export scale factors must be positive"));
        }
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| anyhow!("Failed to write config file: {}", e))?;

        Ok(())
    }
}
