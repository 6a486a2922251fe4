//! Configuration loading
//!
//! Layers, lowest first: built-in defaults, a TOML file, `STEPSCRIPT_*`
//! environment variables (`STEPSCRIPT_SERVER__BIND=0.0.0.0:7000`), then
//! explicit overrides from the command line. A `.env` file in the working
//! directory is read before the environment layer.
//!
//! The file is `--config`, else `$STEPSCRIPT_CONFIG_PATH`, else
//! `./stepscript.toml` when it exists.

use anyhow::{bail, Context, Result};
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

use crate::host::{ArgKind, OptionTable};
use crate::interpreter::executor::DEFAULT_MAX_CALL_DEPTH;
use crate::interpreter::InterpreterConfig;

pub const ENV_PREFIX: &str = "STEPSCRIPT";
pub const CONFIG_PATH_VAR: &str = "STEPSCRIPT_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "stepscript.toml";
pub const DEFAULT_BIND: &str = "127.0.0.1:7878";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub interpreter: InterpreterSettings,
    pub filesystem: FilesystemConfig,
    /// Extra or overridden option commands: name -> argument kinds
    #[serde(default)]
    pub options: BTreeMap<String, Vec<ArgKind>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpreterSettings {
    pub max_call_depth: usize,
    /// Fixed seed for `$RANDOM`; entropy when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// Directory scripts are confined to
    pub root: PathBuf,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Defaults, file and environment, no overrides
    pub fn load() -> Result<Config> {
        Self::builder().build()
    }

    pub fn interpreter_config(&self) -> InterpreterConfig {
        InterpreterConfig {
            max_call_depth: self.interpreter.max_call_depth,
            random_seed: self.interpreter.random_seed,
        }
    }

    pub fn option_table(&self) -> OptionTable {
        OptionTable::with_overrides(&self.options)
    }

    /// Effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    bind: Option<String>,
    root: Option<PathBuf>,
    skip_env: bool,
}

impl ConfigBuilder {
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn bind(mut self, bind: Option<String>) -> Self {
        self.bind = bind;
        self
    }

    pub fn root(mut self, root: Option<PathBuf>) -> Self {
        self.root = root;
        self
    }

    /// Ignore `.env` and `STEPSCRIPT_*` variables
    pub fn without_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    pub fn build(self) -> Result<Config> {
        if !self.skip_env {
            // A missing .env is fine
            let _ = dotenvy::dotenv();
        }

        let mut builder = config::Config::builder()
            .set_default("server.bind", DEFAULT_BIND)?
            .set_default("interpreter.max_call_depth", DEFAULT_MAX_CALL_DEPTH as i64)?
            .set_default("filesystem.root", ".")?;

        let env_path = if self.skip_env {
            None
        } else {
            std::env::var_os(CONFIG_PATH_VAR).map(PathBuf::from)
        };
        match self.config_path.or(env_path) {
            Some(path) => {
                debug!(path = %path.display(), "loading config file");
                if !path.is_file() {
                    bail!("Config file not found: {}", path.display());
                }
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
            None => {
                builder = builder.add_source(
                    File::with_name(DEFAULT_CONFIG_FILE)
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }

        if !self.skip_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        if let Some(bind) = self.bind {
            builder = builder.set_override("server.bind", bind)?;
        }
        if let Some(root) = self.root {
            builder = builder.set_override("filesystem.root", root.to_string_lossy().into_owned())?;
        }

        let config: Config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.interpreter.max_call_depth == 0 {
            bail!("interpreter.max_call_depth must be at least 1");
        }
        if self.server.bind.trim().is_empty() {
            bail!("server.bind must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let file = write_config("");
        let config = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .without_env()
            .build()
            .unwrap();

        assert_eq!(config.server.bind, DEFAULT_BIND);
        assert_eq!(config.interpreter.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
        assert_eq!(config.interpreter.random_seed, None);
        assert_eq!(config.filesystem.root, PathBuf::from("."));
        assert!(config.options.is_empty());
    }

    #[test]
    fn test_file_values_and_overrides() {
        let file = write_config(
            r#"
            [server]
            bind = "0.0.0.0:9000"

            [interpreter]
            max_call_depth = 8
            random_seed = 42

            [options]
            notify = ["string", "int"]
            "#,
        );
        let config = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .root(Some(PathBuf::from("/srv/scripts")))
            .without_env()
            .build()
            .unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.interpreter_config().max_call_depth, 8);
        assert_eq!(config.interpreter_config().random_seed, Some(42));
        assert_eq!(config.filesystem.root, PathBuf::from("/srv/scripts"));

        let table = config.option_table();
        assert_eq!(
            table.signature("notify"),
            Some(&[ArgKind::String, ArgKind::Int][..])
        );
        assert!(table.signature("beep").is_some());

        let overridden = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .bind(Some("127.0.0.1:1".to_string()))
            .without_env()
            .build()
            .unwrap();
        assert_eq!(overridden.server.bind, "127.0.0.1:1");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let file = write_config("[interpreter]\nmax_call_depth = 0\n");
        let err = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .without_env()
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max_call_depth"));

        assert!(Config::builder()
            .config_path(Some(PathBuf::from("/nonexistent/stepscript.toml")))
            .without_env()
            .build()
            .is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let file = write_config(
            r#"
            [interpreter]
            random_seed = 7

            [options]
            ping = ["any"]
            "#,
        );
        let config = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .without_env()
            .build()
            .unwrap();

        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("random_seed = 7"));
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
