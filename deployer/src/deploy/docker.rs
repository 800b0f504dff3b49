//! Private registry staging through the docker CLI

use std::process::Stdio;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::deploy::cluster::RegistryCredentials;
use crate::errors::DeployError;

/// Name of an image inside the private registry: the segment after the last `/`
pub fn registry_image_name(image: &str) -> &str {
    image.rsplit('/').next().unwrap_or(image)
}

/// Registry collaborator trait for testability
#[async_trait]
pub trait ContainerRegistry: Send + Sync {
    /// Copy `source` into the registry as `registry_image`
    async fn setup_image(&self, source: &str, registry_image: &str) -> Result<(), DeployError>;

    /// Fully qualified reference of `registry_image` in this registry
    fn repo_tag(&self, registry_image: &str) -> String;

    /// Credentials the cluster needs to pull from this registry
    fn credentials(&self) -> RegistryCredentials;
}

/// Registry reached with `docker login/pull/tag/push`
pub struct DockerRegistry {
    server: String,
    username: String,
    password: SecretString,
    auth_archive_uri: Option<String>,
}

impl DockerRegistry {
    pub fn new(
        server: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
        auth_archive_uri: Option<String>,
    ) -> Self {
        Self {
            server: server.into(),
            username: username.into(),
            password,
            auth_archive_uri,
        }
    }

    async fn login(&self) -> Result<(), DeployError> {
        debug!("Authenticating with {}...", self.server);

        let mut child = Command::new("docker")
            .args([
                "login",
                self.server.as_str(),
                "-u",
                self.username.as_str(),
                "--password-stdin",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DeployError::RegistryError(format!("Failed to run docker login: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(self.password.expose_secret().as_bytes())
                .await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(DeployError::RegistryError(format!(
                "docker login to {} failed: {}",
                self.server,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!("Successfully authenticated with {}", self.server);
        Ok(())
    }
}

async fn docker(args: &[&str]) -> Result<(), DeployError> {
    debug!("docker {}", args.join(" "));
    let status = Command::new("docker")
        .args(args)
        .status()
        .await
        .map_err(|e| DeployError::RegistryError(format!("Failed to run docker {}: {}", args[0], e)))?;

    if !status.success() {
        return Err(DeployError::RegistryError(format!(
            "docker {} failed ({})",
            args.join(" "),
            status
        )));
    }
    Ok(())
}

#[async_trait]
impl ContainerRegistry for DockerRegistry {
    async fn setup_image(&self, source: &str, registry_image: &str) -> Result<(), DeployError> {
        let target = self.repo_tag(registry_image);
        info!("Staging image {} as {}", source, target);

        self.login().await?;
        docker(&["pull", source]).await?;
        docker(&["tag", source, target.as_str()]).await?;
        docker(&["push", target.as_str()]).await?;

        info!("Image available as {}", target);
        Ok(())
    }

    fn repo_tag(&self, registry_image: &str) -> String {
        format!("{}/{}", self.server.trim_end_matches('/'), registry_image)
    }

    fn credentials(&self) -> RegistryCredentials {
        RegistryCredentials {
            server: self.server.clone(),
            username: self.username.clone(),
            password: SecretString::from(self.password.expose_secret().to_string()),
            auth_archive_uri: self.auth_archive_uri.clone(),
        }
    }
}
