use chrono_tz::Tz;
use serde::Deserialize;
use std::{env, fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub parents: Vec<ParentConfig>,
    /// IANA zone used for parents that do not set their own.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    /// Lets a child undo a completed step of a multi-step habit.
    #[serde(default)]
    pub allow_step_uncomplete: bool,
    pub dev_cors_origin: Option<String>,
    pub listen_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParentConfig {
    pub email: String,
    pub name: String,
    pub password_hash: String, // bcrypt hash
    pub timezone: Option<String>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_path(path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        let cfg: AppConfig = serde_yaml::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid(
                "jwt_secret must be at least 16 characters".into(),
            ));
        }
        if self.parents.is_empty() {
            return Err(ConfigError::Invalid("at least one parent is required".into()));
        }
        check_timezone(&self.default_timezone)?;
        let mut seen = std::collections::HashSet::new();
        for p in &self.parents {
            if !p.email.contains('@') {
                return Err(ConfigError::Invalid(format!("invalid email: {}", p.email)));
            }
            if !seen.insert(p.email.to_lowercase()) {
                return Err(ConfigError::Invalid(format!("duplicate parent: {}", p.email)));
            }
            if let Some(tz) = &p.timezone {
                check_timezone(tz)?;
            }
        }
        Ok(())
    }
}

fn check_timezone(name: &str) -> Result<(), ConfigError> {
    name.parse::<Tz>()
        .map(|_| ())
        .map_err(|_| ConfigError::Invalid(format!("unknown timezone: {name}")))
}
