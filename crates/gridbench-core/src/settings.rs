//! Harness configuration.
//!
//! Settings that are about *how the harness runs* rather than about a
//! particular benchmark: ports, timeouts, remote paths and regression
//! thresholds. Loaded from defaults, an optional config file and
//! `GRIDBENCH_`-prefixed environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root settings structure for the harness.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HarnessSettings {
    /// Control-channel settings.
    #[serde(default)]
    pub controller: ControllerSettings,

    /// Remote filesystem layout on the nodes.
    #[serde(default)]
    pub remote: RemoteSettings,

    /// Analyzer thresholds.
    #[serde(default)]
    pub analysis: AnalysisSettings,
}

/// Control-channel settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerSettings {
    /// Address workers use to call back to the orchestrator.
    pub callback_host: String,
    /// Port the controller's callback endpoint binds on.
    pub port: u16,
    /// Seconds to wait for every worker to register before the run fails.
    pub startup_timeout_secs: u64,
    /// Seconds between agent liveness polls of the controller.
    pub ping_interval_secs: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            callback_host: "127.0.0.1".to_string(),
            port: 33333,
            startup_timeout_secs: 300,
            ping_interval_secs: 1,
        }
    }
}

impl ControllerSettings {
    /// Startup timeout as a [`Duration`].
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

/// Remote filesystem layout on the nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteSettings {
    /// Directory the worker runtime artifacts are copied into on each node.
    pub lib_dir: String,
    /// Name of the worker executable inside the lib dir.
    pub worker_binary: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            lib_dir: "lib".to_string(),
            worker_binary: "gridbench-worker".to_string(),
        }
    }
}

/// Analyzer thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisSettings {
    /// Relative change at which a worse result counts as a regression.
    pub regression_threshold: f64,
    /// Relative change at which a better result flags a new-baseline
    /// candidate (only when no probe regressed anywhere).
    pub improvement_threshold: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            regression_threshold: 0.05,
            improvement_threshold: 0.05,
        }
    }
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            controller: ControllerSettings::default(),
            remote: RemoteSettings::default(),
            analysis: AnalysisSettings::default(),
        }
    }
}

impl HarnessSettings {
    /// Loads settings with precedence: environment variables, then the file
    /// named by `GRIDBENCH_CONFIG`, then `./gridbench.toml`, then defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a source cannot be parsed or the
    /// resulting settings fail validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("controller.callback_host", "127.0.0.1")?
            .set_default("controller.port", 33333)?
            .set_default("controller.startup_timeout_secs", 300)?
            .set_default("controller.ping_interval_secs", 1)?
            .set_default("remote.lib_dir", "lib")?
            .set_default("remote.worker_binary", "gridbench-worker")?
            .set_default("analysis.regression_threshold", 0.05)?
            .set_default("analysis.improvement_threshold", 0.05)?;

        if let Ok(config_path) = std::env::var("GRIDBENCH_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }
        builder = builder
            .add_source(File::with_name("./gridbench").required(false))
            .add_source(
                Environment::with_prefix("GRIDBENCH")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates the settings values.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.startup_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "controller.startup_timeout_secs must be > 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.analysis.regression_threshold) {
            return Err(ConfigError::Message(
                "analysis.regression_threshold must be in [0, 1)".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.analysis.improvement_threshold) {
            return Err(ConfigError::Message(
                "analysis.improvement_threshold must be in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = HarnessSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.controller.port, 33333);
        assert_eq!(settings.controller.startup_timeout_secs, 300);
        assert!((settings.analysis.regression_threshold - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut settings = HarnessSettings::default();
        settings.controller.startup_timeout_secs = 0;
        assert!(settings.validate().is_err());
    }
}
