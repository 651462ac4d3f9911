// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session configuration.
//!
//! Configuration is layered: the embedded [default config](SessionConfig::DEFAULT_CONFIG),
//! then an optional TOML file, then `TESTRUN_`-prefixed environment
//! variables (for example `TESTRUN_LAUNCH__KEEP_ALIVE=true`).

use crate::errors::ConfigParseError;
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use serde::Deserialize;

/// Configuration for a test-run session.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct SessionConfig {
    /// Naming and tags.
    pub session: SessionSection,

    /// How the runner was launched.
    pub launch: LaunchConfig,

    /// Where idle sessions are swapped out to.
    #[serde(default)]
    pub swap: SwapConfig,

    /// Transcript import settings.
    pub import: ImportConfig,
}

/// The `[session]` section.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct SessionSection {
    /// The session name; also the name of the tree root.
    pub name: String,

    /// The project the run belongs to.
    #[serde(default)]
    pub project: Option<String>,

    /// The include-tag expression the runner was launched with.
    #[serde(default, alias = "include_tags")]
    pub include_tags: Option<String>,

    /// The exclude-tag expression the runner was launched with.
    #[serde(default, alias = "exclude_tags")]
    pub exclude_tags: Option<String>,
}

/// The `[launch]` section.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct LaunchConfig {
    /// Run or debug.
    pub mode: LaunchMode,

    /// Whether the runner is asked to stay alive for reruns.
    #[serde(alias = "keep_alive")]
    pub keep_alive: bool,

    /// The port to listen on. 0 picks a free port.
    pub port: u16,
}

/// How the runner was launched.
#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchMode {
    /// A normal run.
    Run,

    /// A debug run. Only debug runs can be kept alive.
    Debug,
}

/// The `[swap]` section.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct SwapConfig {
    /// The swap directory, if overridden.
    #[serde(default)]
    pub dir: Option<Utf8PathBuf>,
}

impl SwapConfig {
    /// The name of the swap directory under the system temporary directory.
    pub const DEFAULT_DIR_NAME: &'static str = "testrun-swap";

    /// Returns the configured directory, or the default one.
    pub fn resolved_dir(&self) -> Utf8PathBuf {
        match &self.dir {
            Some(dir) => dir.clone(),
            None => {
                let temp_dir = Utf8PathBuf::try_from(std::env::temp_dir())
                    .unwrap_or_else(|_| Utf8PathBuf::from("."));
                temp_dir.join(Self::DEFAULT_DIR_NAME)
            }
        }
    }
}

/// The `[import]` section.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ImportConfig {
    /// Source lines between progress reports.
    #[serde(alias = "progress_interval")]
    pub progress_interval: usize,
}

impl SessionConfig {
    /// The default config, embedded at build time.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Environment overrides use this prefix, plus a `_`.
    pub const ENVIRONMENT_PREFIX: &'static str = "TESTRUN";

    /// Reads the config from the defaults, an optional file and the
    /// environment.
    pub fn from_sources(file: Option<&Utf8Path>) -> Result<Self, ConfigParseError> {
        let mut builder = Self::make_default_config();
        if let Some(file) = file {
            builder = builder.add_source(File::new(file.as_str(), FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix(Self::ENVIRONMENT_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config_file = file.map_or_else(|| Utf8PathBuf::from("<default>"), Utf8Path::to_owned);
        Self::build_and_deserialize_config(&builder)
            .map_err(|err| ConfigParseError::new(config_file, err))
    }

    /// Returns the embedded default config, without any file or environment
    /// overrides.
    pub fn default_config() -> Result<Self, ConfigParseError> {
        Self::build_and_deserialize_config(&Self::make_default_config())
            .map_err(|err| ConfigParseError::new("<default>", err))
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<Self, config::ConfigError> {
        builder.build_cloned()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_parses() {
        let config = SessionConfig::default_config().expect("default config is valid");
        assert_eq!(
            config,
            SessionConfig {
                session: SessionSection {
                    name: "testrun".to_owned(),
                    project: None,
                    include_tags: None,
                    exclude_tags: None,
                },
                launch: LaunchConfig {
                    mode: LaunchMode::Run,
                    keep_alive: false,
                    port: 0,
                },
                swap: SwapConfig { dir: None },
                import: ImportConfig {
                    progress_interval: 20,
                },
            }
        );
        assert!(
            config
                .swap
                .resolved_dir()
                .ends_with(SwapConfig::DEFAULT_DIR_NAME)
        );
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let path = dir.path().join("testrun.toml");
        std::fs::write(
            &path,
            indoc! {r#"
                [session]
                name = "nightly"
                project = "calc"
                include-tags = "fast"

                [launch]
                mode = "debug"
                keep-alive = true

                [swap]
                dir = "/var/tmp/swap"
            "#},
        )
        .expect("wrote config");

        let config = SessionConfig::from_sources(Some(&path)).expect("config is valid");
        assert_eq!(config.session.name, "nightly");
        assert_eq!(config.session.project.as_deref(), Some("calc"));
        assert_eq!(config.session.include_tags.as_deref(), Some("fast"));
        assert_eq!(config.session.exclude_tags, None);
        assert_eq!(config.launch.mode, LaunchMode::Debug);
        assert!(config.launch.keep_alive);
        assert_eq!(config.launch.port, 0);
        assert_eq!(
            config.swap.resolved_dir(),
            Utf8PathBuf::from("/var/tmp/swap")
        );
        assert_eq!(config.import.progress_interval, 20);
    }

    #[test]
    fn invalid_file_reports_path() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let path = dir.path().join("testrun.toml");
        std::fs::write(&path, "[launch]\nmode = \"sideways\"\n").expect("wrote config");

        let error = SessionConfig::from_sources(Some(&path)).expect_err("mode is invalid");
        assert_eq!(error.config_file(), &path);
    }
}
