//! Cluster collaborator: master address, key material and container launch

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{DeployError, TransferError};
use crate::http::client::HttpClient;

/// `user@host` address of the cluster master.
///
/// Treated as opaque; [`RemoteAddress::validate`] is re-run by every
/// transfer instead of being trusted once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddress(String);

impl RemoteAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the address is `user@host` with no whitespace
    pub fn validate(&self) -> Result<(), TransferError> {
        let invalid = || TransferError::InvalidAddress(self.0.clone());

        if self.0.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        match self.0.split_once('@') {
            Some((user, host)) if !user.is_empty() && !host.is_empty() && !host.contains('@') => {
                Ok(())
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credentials the cluster needs to pull from a private registry
#[derive(Debug)]
pub struct RegistryCredentials {
    pub server: String,
    pub username: String,
    pub password: SecretString,
    /// Archive with a docker auth config, fetched by the scheduler onto each node
    pub auth_archive_uri: Option<String>,
}

/// Cluster collaborator trait for testability
#[async_trait]
pub trait ClusterService: Send + Sync {
    /// SSH login of the cluster master
    async fn master_address(&self) -> Result<RemoteAddress, DeployError>;

    /// Local path of the SSH private key trusted by the cluster
    fn key_path(&self) -> PathBuf;

    /// Launch the container on the cluster
    async fn launch(
        &self,
        image: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<(), DeployError>;
}

/// Shape of the launched app
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub id: String,
    pub cpus: f64,
    pub mem: f64,
    pub instances: u32,
    pub container_port: u16,
    pub host_port: u16,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            id: "/containersample".to_string(),
            cpus: 0.1,
            mem: 64.0,
            instances: 1,
            container_port: 80,
            host_port: 80,
        }
    }
}

/// Cluster whose containers are scheduled through Marathon
pub struct MarathonCluster {
    master: RemoteAddress,
    key_path: PathBuf,
    http_client: HttpClient,
    app: AppOptions,
}

impl MarathonCluster {
    pub fn new(
        master: RemoteAddress,
        key_path: impl Into<PathBuf>,
        http_client: HttpClient,
        app: AppOptions,
    ) -> Self {
        Self {
            master,
            key_path: key_path.into(),
            http_client,
            app,
        }
    }
}

#[async_trait]
impl ClusterService for MarathonCluster {
    async fn master_address(&self) -> Result<RemoteAddress, DeployError> {
        Ok(self.master.clone())
    }

    fn key_path(&self) -> PathBuf {
        self.key_path.clone()
    }

    async fn launch(
        &self,
        image: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<(), DeployError> {
        info!("Launching {} as app {}", image, self.app.id);

        let definition = app_definition(&self.app, image, credentials);
        debug!("App definition: {}", serde_json::to_string(&definition)?);

        let path = format!("v2/apps/{}?force=true", self.app.id.trim_start_matches('/'));
        let deployment: MarathonDeployment = self.http_client.put(&path, &definition).await?;

        info!(
            "App {} submitted (deployment {})",
            self.app.id,
            deployment.deployment_id.as_deref().unwrap_or("unknown")
        );
        Ok(())
    }
}

/// Marathon app definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppDefinition {
    pub id: String,
    pub cpus: f64,
    pub mem: f64,
    pub instances: u32,
    pub container: ContainerSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fetch: Vec<FetchUri>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub docker: DockerSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DockerSpec {
    pub image: String,
    pub network: String,
    pub port_mappings: Vec<PortMapping>,
    pub force_pull_image: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchUri {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarathonDeployment {
    #[serde(default)]
    deployment_id: Option<String>,
}

/// Build the app definition for an image
pub fn app_definition(
    app: &AppOptions,
    image: &str,
    credentials: Option<&RegistryCredentials>,
) -> AppDefinition {
    let fetch = credentials
        .and_then(|c| c.auth_archive_uri.clone())
        .map(|uri| vec![FetchUri { uri }])
        .unwrap_or_default();

    AppDefinition {
        id: app.id.clone(),
        cpus: app.cpus,
        mem: app.mem,
        instances: app.instances,
        container: ContainerSpec {
            kind: "DOCKER".to_string(),
            docker: DockerSpec {
                image: image.to_string(),
                network: "BRIDGE".to_string(),
                port_mappings: vec![PortMapping {
                    container_port: app.container_port,
                    host_port: app.host_port,
                    protocol: "tcp".to_string(),
                }],
                force_pull_image: true,
            },
        },
        fetch,
    }
}
