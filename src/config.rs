use crate::UserCommandsError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Mapping;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default.yaml");
pub const DEFAULT_SELECTOR: &str = "atom-workspace";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    pub projects: Vec<String>,
    pub commands: Vec<CommandSpec>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    pub name: String,
    #[serde(default = "default_selector")]
    pub selector: String,
    pub command: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub arguments: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: Mapping,
}

fn default_selector() -> String {
    DEFAULT_SELECTOR.to_string()
}

// `arguments: ~` and `options: ~` read as empty.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            projects: Vec::new(),
            commands: Vec::new(),
        }
    }
}

impl Config {
    pub fn project_roots(&self) -> Vec<PathBuf> {
        self.projects
            .iter()
            .filter(|root| !root.trim().is_empty())
            .map(|root| PathBuf::from(expand_path(root)))
            .collect()
    }
}

pub fn read_config_from_str(content: &str) -> Result<Config, UserCommandsError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn read_config(path: &Path) -> Result<Config, UserCommandsError> {
    let content = fs::read_to_string(path)?;
    read_config_from_str(&content)
}

pub fn validate_config(cfg: &Config) -> Result<(), UserCommandsError> {
    if cfg.version != 1 {
        return Err(UserCommandsError::Config(format!(
            "unsupported config version {}",
            cfg.version
        )));
    }
    let mut seen = BTreeSet::new();
    for (index, command) in cfg.commands.iter().enumerate() {
        if command.name.trim().is_empty() {
            return Err(UserCommandsError::Config(format!(
                "commands[{index}].name must not be empty"
            )));
        }
        if command.command.trim().is_empty() {
            return Err(UserCommandsError::Config(format!(
                "command '{}' has an empty command line",
                command.name
            )));
        }
        if !seen.insert(command.name.as_str()) {
            return Err(UserCommandsError::Config(format!(
                "duplicate command name '{}'",
                command.name
            )));
        }
    }
    Ok(())
}

// Commands whose program cannot be found on `PATH`. Templated programs are skipped
// because they only resolve at invocation time.
pub fn missing_programs(cfg: &Config) -> Vec<String> {
    cfg.commands
        .iter()
        .filter(|command| !command.command.contains('{'))
        .filter(|command| {
            let program = Path::new(&command.command);
            if program.is_absolute() {
                !program.exists()
            } else {
                which::which(program).is_err()
            }
        })
        .map(|command| command.name.clone())
        .collect()
}

pub fn expand_path(input: &str) -> String {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped).to_string_lossy().to_string();
        }
    }
    input.to_string()
}

pub fn ensure_parent(path: &Path) -> Result<(), UserCommandsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub struct ConfigStore {
    path: PathBuf,
    current: Config,
}

impl ConfigStore {
    pub fn load(path: &Path) -> Result<Self, UserCommandsError> {
        let current = read_config(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            current,
        })
    }

    pub fn current(&self) -> &Config {
        &self.current
    }

    // Re-read the backing file. Returns the new value only when it changed.
    pub fn reload(&mut self) -> Result<Option<&Config>, UserCommandsError> {
        let next = read_config(&self.path)?;
        if next == self.current {
            return Ok(None);
        }
        log::info!("config changed: {}", self.path.display());
        self.current = next;
        Ok(Some(&self.current))
    }
}
