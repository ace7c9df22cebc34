//! Configuration resolution for jsfabric.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/jsfabric/settings.json`)
//! 3. Project config (`.jsfabric/settings.json`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// Complete jsfabric configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub process: ProcessConfiguration,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Seconds a disposed child gets to exit after being killed.
    #[serde(default = "default_termination_timeout_secs")]
    pub termination_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            process: ProcessConfiguration::default(),
            pool: PoolConfig::default(),
            termination_timeout_secs: default_termination_timeout_secs(),
        }
    }
}

const fn default_termination_timeout_secs() -> u64 {
    5
}

/// Everything needed to start one child engine process, except the script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfiguration {
    /// Interpreter executable, resolved through `PATH` when not absolute.
    pub executable: PathBuf,
    /// Extra flags placed before `-e`, e.g. `--inspect --max-old-space-size=512`.
    pub interpreter_flags: Option<String>,
    /// Port the child binds for its invocation channel. 0 lets the child choose.
    pub port: u16,
    /// Working directory of the child; its `node_modules` joins `NODE_PATH`.
    pub working_directory: Option<PathBuf>,
    /// Variables overlaid on the inherited environment. `None` values are skipped.
    pub environment_variables: BTreeMap<String, Option<String>>,
}

impl Default for ProcessConfiguration {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("node"),
            interpreter_flags: None,
            port: 0,
            working_directory: None,
            environment_variables: BTreeMap::new(),
        }
    }
}

impl ProcessConfiguration {
    /// Derive the configuration of pool member `index`.
    ///
    /// A zero port stays zero for every member; otherwise member `i` binds
    /// `port + i`. The receiver is left untouched.
    pub fn for_member(&self, index: usize) -> Result<Self> {
        let port = if self.port == 0 {
            0
        } else {
            u16::try_from(index)
                .ok()
                .and_then(|offset| self.port.checked_add(offset))
                .ok_or_else(|| {
                    Error::Config(format!(
                        "Port {} plus member index {index} exceeds the valid port range",
                        self.port
                    ))
                })?
        };
        Ok(Self {
            port,
            ..self.clone()
        })
    }
}

/// Pool sizing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of child processes. 0 means one per available CPU.
    #[serde(default)]
    pub size: usize,
}

impl PoolConfig {
    /// Resolve the configured size to a concrete, non-zero member count.
    pub fn effective_size(&self) -> usize {
        if self.size > 0 {
            return self.size;
        }
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    // Load global config
    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            debug!(path = %global_path.display(), "Loading global config");
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global);
        }
    }

    // Load project config
    if let Some(dir) = project_dir {
        let project_path = project_config_path(dir);
        if project_path.exists() {
            debug!(path = %project_path.display(), "Loading project config");
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("jsfabric").join("settings.json"))
}

/// Get the project config file path under `project_dir`.
pub fn project_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".jsfabric").join("settings.json")
}

/// One settings file. Absent fields leave the layer below untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigOverlay {
    process: ProcessOverlay,
    pool: PoolOverlay,
    termination_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProcessOverlay {
    executable: Option<PathBuf>,
    interpreter_flags: Option<String>,
    port: Option<u16>,
    working_directory: Option<PathBuf>,
    environment_variables: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PoolOverlay {
    size: Option<usize>,
}

fn load_config_file(path: &Path) -> Result<ConfigOverlay> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: ConfigOverlay) {
    let process = overlay.process;
    if let Some(executable) = process.executable {
        base.process.executable = executable;
    }
    if let Some(port) = process.port {
        base.process.port = port;
    }
    if process.interpreter_flags.is_some() {
        base.process.interpreter_flags = process.interpreter_flags;
    }
    if process.working_directory.is_some() {
        base.process.working_directory = process.working_directory;
    }
    base.process
        .environment_variables
        .extend(process.environment_variables);

    if let Some(size) = overlay.pool.size {
        base.pool.size = size;
    }
    if let Some(secs) = overlay.termination_timeout_secs {
        base.termination_timeout_secs = secs;
    }
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(val) = var("JSFABRIC_EXECUTABLE") {
        config.process.executable = PathBuf::from(val);
    }
    if let Some(val) = var("JSFABRIC_INTERPRETER_FLAGS") {
        config.process.interpreter_flags = Some(val);
    }
    if let Some(n) = var("JSFABRIC_PORT").and_then(|v| v.parse().ok()) {
        config.process.port = n;
    }
    if let Some(n) = var("JSFABRIC_POOL_SIZE").and_then(|v| v.parse().ok()) {
        config.pool.size = n;
    }
}
