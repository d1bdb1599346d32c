//! Harness configuration, loaded from TOML.

use serde::{Deserialize, Serialize};
use simlane_core::TestTarget;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Longest timeout accepted for any external tool.
const MAX_TIMEOUT_SECONDS: u64 = 24 * 60 * 60;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Full harness configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Resource limits
    pub resources: ResourcesConfig,
    /// External tool timeouts
    pub timeouts: TimeoutsConfig,
    /// External tool executables
    pub tools: ToolsConfig,
    /// Preconditions checked before each task
    pub checks: ChecksConfig,
    /// Test projects to schedule
    pub projects: Vec<ProjectConfig>,
}

impl HarnessConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and project definitions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timeouts.validate()?;
        for project in &self.projects {
            if project.name.trim().is_empty() {
                return Err(ConfigError::Invalid("project name must not be empty".into()));
            }
            if project.targets.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "project '{}' has no targets",
                    project.name
                )));
            }
            if project.bundle_identifier.is_empty() && !project.build_only {
                return Err(ConfigError::Invalid(format!(
                    "project '{}' needs a bundle_identifier to run",
                    project.name
                )));
            }
        }
        Ok(())
    }
}

/// `[resources]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    /// Builds allowed on the host at the same time
    pub max_concurrent_builds: NonZeroUsize,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            max_concurrent_builds: NonZeroUsize::MIN,
        }
    }
}

/// `[timeouts]`, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Build and package restore
    pub build_seconds: u64,
    /// Running an app
    pub run_seconds: u64,
    /// Listing simulators or devices
    pub discovery_seconds: u64,
    /// Each simulator control command
    pub simctl_seconds: u64,
    /// Installing or uninstalling an app
    pub install_seconds: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            build_seconds: 30 * 60,
            run_seconds: 20 * 60,
            discovery_seconds: 2 * 60,
            simctl_seconds: 2 * 60,
            install_seconds: 5 * 60,
        }
    }
}

impl TimeoutsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("build_seconds", self.build_seconds),
            ("run_seconds", self.run_seconds),
            ("discovery_seconds", self.discovery_seconds),
            ("simctl_seconds", self.simctl_seconds),
            ("install_seconds", self.install_seconds),
        ] {
            if value == 0 || value > MAX_TIMEOUT_SECONDS {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.{name} must be between 1 and {MAX_TIMEOUT_SECONDS}, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Build timeout.
    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_seconds)
    }

    /// Run timeout.
    pub fn run(&self) -> Duration {
        Duration::from_secs(self.run_seconds)
    }

    /// Discovery timeout.
    pub fn discovery(&self) -> Duration {
        Duration::from_secs(self.discovery_seconds)
    }

    /// Simulator control timeout.
    pub fn simctl(&self) -> Duration {
        Duration::from_secs(self.simctl_seconds)
    }

    /// Install timeout.
    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install_seconds)
    }
}

/// `[tools]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Listing tool
    pub discovery: String,
    /// Build tool
    pub build: String,
    /// Build argument template; `{project}`, `{configuration}` and `{platform}` are expanded
    pub build_args: Option<Vec<String>>,
    /// Package restore argument template
    pub restore_args: Option<Vec<String>>,
    /// `xcrun`, used for `simctl`
    pub xcrun: String,
    /// Installer and runner
    pub runner: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            discovery: "mlaunch".into(),
            build: "xcodebuild".into(),
            build_args: None,
            restore_args: None,
            xcrun: "xcrun".into(),
            runner: "mlaunch".into(),
        }
    }
}

/// `[checks]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksConfig {
    /// Minimum free disk space in MB; 0 disables the check
    pub min_free_disk_mb: u64,
    /// Path whose file system is checked
    pub disk_path: PathBuf,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            min_free_disk_mb: 0,
            disk_path: PathBuf::from("/"),
        }
    }
}

/// One `[[projects]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Display name
    pub name: String,
    /// Project file
    pub path: PathBuf,
    /// Build configuration
    pub configuration: String,
    /// App bundle identifier
    pub bundle_identifier: String,
    /// Built app bundle (or executable, for macOS)
    pub app_path: PathBuf,
    /// Where to build and run
    pub targets: Vec<TestTarget>,
    /// Skip this project
    pub ignored: bool,
    /// Build without running
    pub build_only: bool,
    /// Restore packages before building
    pub restore_packages: bool,
    /// Triage note for an expected failure
    pub known_failure: Option<String>,
    /// Variation label
    pub variation: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            path: PathBuf::new(),
            configuration: "Debug".into(),
            bundle_identifier: String::new(),
            app_path: PathBuf::new(),
            targets: Vec::new(),
            ignored: false,
            build_only: false,
            restore_packages: false,
            known_failure: None,
            variation: "default".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = HarnessConfig::from_toml("").unwrap();
        assert_eq!(config.resources.max_concurrent_builds.get(), 1);
        assert_eq!(config.timeouts.build(), Duration::from_secs(1800));
        assert_eq!(config.tools.xcrun, "xcrun");
        assert!(config.projects.is_empty());
    }

    #[test]
    fn test_parse_projects() {
        let config = HarnessConfig::from_toml(
            r#"
            [resources]
            max_concurrent_builds = 4

            [timeouts]
            build_seconds = 600

            [[projects]]
            name = "monotouch-test"
            path = "tests/monotouch-test/monotouch-test.xcodeproj"
            bundle_identifier = "com.example.monotouch-test"
            app_path = "build/monotouch-test.app"
            targets = ["simulator-ios", "simulator-watchos", "device-ios"]
            known_failure = "flaky on watchOS"
            "#,
        )
        .unwrap();

        assert_eq!(config.resources.max_concurrent_builds.get(), 4);
        assert_eq!(config.timeouts.build_seconds, 600);
        assert_eq!(config.timeouts.run_seconds, 1200);
        let project = &config.projects[0];
        assert_eq!(project.configuration, "Debug");
        assert_eq!(
            project.targets,
            vec![TestTarget::SimulatorIos, TestTarget::SimulatorWatchos, TestTarget::DeviceIos]
        );
        assert_eq!(project.known_failure.as_deref(), Some("flaky on watchOS"));
    }

    #[test]
    fn test_timeouts_out_of_range_are_rejected() {
        for text in ["[timeouts]\nrun_seconds = 0", "[timeouts]\nbuild_seconds = 86401"] {
            assert!(matches!(
                HarnessConfig::from_toml(text),
                Err(ConfigError::Invalid(_))
            ));
        }
        assert!(HarnessConfig::from_toml("[timeouts]\nbuild_seconds = 86400").is_ok());
    }

    #[test]
    fn test_zero_builds_is_a_parse_error() {
        assert!(matches!(
            HarnessConfig::from_toml("[resources]\nmax_concurrent_builds = 0"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_project_without_targets_is_invalid() {
        let err = HarnessConfig::from_toml("[[projects]]\nname = \"a\"\nbundle_identifier = \"b\"")
            .unwrap_err();
        assert!(err.to_string().contains("has no targets"));
    }

    #[test]
    fn test_from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let err = HarnessConfig::from_file(&missing).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));

        let present = dir.path().join("simlane.toml");
        std::fs::write(&present, "[checks]\nmin_free_disk_mb = 2048\n").unwrap();
        let config = HarnessConfig::from_file(&present).unwrap();
        assert_eq!(config.checks.min_free_disk_mb, 2048);
    }
}
