//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Environment variable consulted when the storage key is not in the file
pub const STORAGE_KEY_ENV: &str = "ACSDEPLOY_STORAGE_KEY";

/// Environment variable consulted when the registry password is not in the file
pub const REGISTRY_PASSWORD_ENV: &str = "ACSDEPLOY_REGISTRY_PASSWORD";

/// Image deployed when none is configured
pub const DEFAULT_IMAGE: &str = "mesosphere/simple-docker";

/// Deployer settings
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to files in this directory
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Image to deploy
    #[serde(default = "default_image")]
    pub image: String,

    /// Stage the image through the private registry
    #[serde(default)]
    pub use_registry: bool,

    /// Directory with the mount template and companion script
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Bound on waiting for the remote shell to exit; unset waits forever
    #[serde(default)]
    pub session_close_timeout_secs: Option<u64>,

    /// Cluster configuration
    #[serde(default)]
    pub cluster: ClusterSettings,

    /// Storage account configuration
    #[serde(default)]
    pub storage: StorageSettings,

    /// Private registry configuration
    #[serde(default)]
    pub registry: RegistrySettings,
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()).map(SecretString::from))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            image: default_image(),
            use_registry: false,
            scripts_dir: default_scripts_dir(),
            session_close_timeout_secs: None,
            cluster: ClusterSettings::default(),
            storage: StorageSettings::default(),
            registry: RegistrySettings::default(),
        }
    }
}

/// Cluster settings
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSettings {
    /// SSH login of the master, `user@host`
    #[serde(default)]
    pub master_address: String,

    /// SSH port of the master
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Private key trusted by the cluster
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,

    /// Marathon API base URL
    #[serde(default = "default_marathon_url")]
    pub marathon_url: String,

    /// Marathon app id
    #[serde(default = "default_app_id")]
    pub app_id: String,

    #[serde(default = "default_cpus")]
    pub cpus: f64,

    #[serde(default = "default_mem")]
    pub mem: f64,

    #[serde(default = "default_instances")]
    pub instances: u32,

    /// Port the container listens on, mapped to the same host port
    #[serde(default = "default_port")]
    pub port: u16,

    /// URL probed after a successful deployment
    #[serde(default)]
    pub public_endpoint: Option<String>,
}

fn default_ssh_port() -> u16 {
    2200
}

fn default_key_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ssh")
        .join("id_rsa")
}

fn default_marathon_url() -> String {
    "http://localhost/marathon".to_string()
}

fn default_app_id() -> String {
    "/containersample".to_string()
}

fn default_cpus() -> f64 {
    0.1
}

fn default_mem() -> f64 {
    64.0
}

fn default_instances() -> u32 {
    1
}

fn default_port() -> u16 {
    80
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            master_address: String::new(),
            ssh_port: default_ssh_port(),
            key_path: default_key_path(),
            marathon_url: default_marathon_url(),
            app_id: default_app_id(),
            cpus: default_cpus(),
            mem: default_mem(),
            instances: default_instances(),
            port: default_port(),
            public_endpoint: None,
        }
    }
}

/// Storage account settings
#[derive(Debug, Deserialize)]
pub struct StorageSettings {
    /// Storage account name
    #[serde(default)]
    pub account: String,

    /// File share mounted on every node
    #[serde(default = "default_share")]
    pub share: String,

    /// Storage account access key
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub key: Option<SecretString>,
}

fn default_share() -> String {
    "share".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            account: String::new(),
            share: default_share(),
            key: None,
        }
    }
}

/// Private registry settings
#[derive(Debug, Default, Deserialize)]
pub struct RegistrySettings {
    /// Registry name, also the share mount user
    #[serde(default)]
    pub name: String,

    /// Login server, e.g. `sample.azurecr.io`
    #[serde(default)]
    pub login_server: String,

    /// Registry username
    #[serde(default)]
    pub username: String,

    /// Registry password
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,

    /// Docker auth archive the scheduler fetches onto each node
    #[serde(default)]
    pub auth_archive_uri: Option<String>,
}

impl Settings {
    /// Load settings from a JSON file
    pub async fn load(file: &File) -> Result<Self, DeployError> {
        let contents = file.read_string().await?;
        Self::from_json(&contents)
    }

    /// Parse settings from JSON text
    pub fn from_json(contents: &str) -> Result<Self, DeployError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Fill secrets missing from the file using a variable lookup.
    ///
    /// Called once at startup with the process environment.
    pub fn apply_secret_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.storage.key.is_none() {
            self.storage.key = lookup(STORAGE_KEY_ENV)
                .filter(|v| !v.is_empty())
                .map(SecretString::from);
        }
        if self.registry.password.is_none() {
            self.registry.password = lookup(REGISTRY_PASSWORD_ENV)
                .filter(|v| !v.is_empty())
                .map(SecretString::from);
        }
    }

    /// Session close bound
    pub fn session_close_timeout(&self) -> Option<Duration> {
        self.session_close_timeout_secs.map(Duration::from_secs)
    }

    /// Report every missing required field at once
    pub fn validate(&self) -> Result<(), DeployError> {
        let mut missing = Vec::new();

        if self.image.trim().is_empty() {
            missing.push("image");
        }
        if self.cluster.master_address.trim().is_empty() {
            missing.push("cluster.master_address");
        }
        if self.storage.account.trim().is_empty() {
            missing.push("storage.account");
        }
        if self.storage.share.trim().is_empty() {
            missing.push("storage.share");
        }
        if self.storage.key.is_none() {
            missing.push("storage.key");
        }
        if self.registry.name.trim().is_empty() {
            missing.push("registry.name");
        }
        if self.use_registry {
            if self.registry.login_server.trim().is_empty() {
                missing.push("registry.login_server");
            }
            if self.registry.username.trim().is_empty() {
                missing.push("registry.username");
            }
            if self.registry.password.is_none() {
                missing.push("registry.password");
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DeployError::ConfigError(format!(
                "missing settings: {}",
                missing.join(", ")
            )))
        }
    }
}
