use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::ConfigError;
use super::parameters::DetectorType;

/// Travel limits of one stage axis in mm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    pub high: f64,
    pub low: f64,
}

/// Motion settings applied to the stage by `initialise`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub velocity: f64,
    pub acceleration: f64,
    pub x_limits: AxisLimits,
    pub y_limits: AxisLimits,
    pub z_limits: AxisLimits,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            velocity: 20.0,
            acceleration: 0.01,
            x_limits: AxisLimits {
                high: 30.0,
                low: -29.0,
            },
            y_limits: AxisLimits {
                high: 30.0,
                low: -30.0,
            },
            z_limits: AxisLimits {
                high: 5.1,
                low: -4.1,
            },
        }
    }
}

/// Structure representing the application configuration. Contains the locations of the
/// beamline parameter files and the settings applied to the hardware.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Visit directory recorded in the run parameters
    pub visit: String,
    /// Directory holding parameters.txt, motor_direction.txt and the fiducial files
    pub param_path: PathBuf,
    /// Directory holding cs_maker.json
    pub cs_path: PathBuf,
    /// Directory holding the .lite block maps and currentchip.map
    pub litemap_path: PathBuf,
    /// Directory holding the per-chip .pvar files
    pub pvar_path: PathBuf,
    /// Root under which chip site files are written (`<root>/chips/<sub_dir>/`)
    pub chip_file_path: PathBuf,
    /// Directory the log files are written to
    pub log_path: PathBuf,
    /// State file of the simulated hardware adapter
    pub hardware_state_path: PathBuf,
    pub hardware_timeout_s: f64,
    pub stage: StageConfig,
    pub default_detector: DetectorType,
    /// Allowed deviation of a calibrated row norm from 1.0 before warning
    pub residual_tolerance: f64,
}

impl Default for Config {
    /// Generate a new Config object rooted in the current directory
    fn default() -> Self {
        Self {
            visit: String::from("/dls/i24/data/2023/visit/"),
            param_path: PathBuf::from("parameters"),
            cs_path: PathBuf::from("parameters/cs"),
            litemap_path: PathBuf::from("parameters/litemaps"),
            pvar_path: PathBuf::from("parameters/pvar_files"),
            chip_file_path: PathBuf::from("parameters"),
            log_path: PathBuf::from("logs"),
            hardware_state_path: PathBuf::from("parameters/hardware_state.yml"),
            hardware_timeout_s: 5.0,
            stage: StageConfig::default(),
            default_detector: DetectorType::Eiger,
            residual_tolerance: 0.01,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    pub fn hardware_timeout(&self) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(self.hardware_timeout_s)
            .map_err(|_| ConfigError::InvalidTimeout(self.hardware_timeout_s))
    }

    pub fn parameter_file(&self) -> PathBuf {
        self.param_path.join("parameters.txt")
    }

    pub fn motor_direction_file(&self) -> PathBuf {
        self.param_path.join("motor_direction.txt")
    }

    /// Path to the file recording fiducial `point` (1 or 2)
    pub fn fiducial_file(&self, point: u8) -> PathBuf {
        self.param_path.join(format!("fiducial_{point}.txt"))
    }

    pub fn cs_maker_file(&self) -> PathBuf {
        self.cs_path.join("cs_maker.json")
    }

    /// Directory for the chip files of a run, e.g. `<chip_file_path>/chips/<sub_dir>`
    pub fn chip_directory(&self, sub_dir: &str) -> PathBuf {
        self.chip_file_path.join("chips").join(sub_dir)
    }
}
