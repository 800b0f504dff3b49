//! Deployment orchestrator
//!
//! Drives one deployment strictly in sequence: optional registry staging,
//! mount-script rendering, three file transfers, one remote session and the
//! final container launch. The first fatal transport failure stops the run.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::{info, info_span, warn, Instrument};

use crate::deploy::cluster::{ClusterService, RemoteAddress};
use crate::deploy::docker::{registry_image_name, ContainerRegistry};
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState};
use crate::deploy::report::print_output;
use crate::deploy::session::{ScopedSession, SessionConnector, SessionTranscript};
use crate::deploy::template::{self, MountValues};
use crate::deploy::transfer::TransferChannel;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::storage::layout::{ScriptLayout, MOUNT_SHARES_SCRIPT};
use crate::utils::generate_run_id;

/// Storage account whose file share is mounted on the cluster
pub struct StorageIdentity {
    pub account: String,
    pub share: String,
    pub key: SecretString,
}

/// Private registry identity
#[derive(Debug, Clone)]
pub struct RegistryIdentity {
    pub name: String,
    pub login_server: String,
}

/// Everything one deployment run needs, fixed before it starts
pub struct DeploymentContext {
    /// Full image reference, e.g. `mesosphere/simple-docker`
    pub image: String,
    pub storage: StorageIdentity,
    pub registry: RegistryIdentity,
    pub scripts: ScriptLayout,
}

/// How the image reaches the cluster
#[derive(Clone)]
pub enum DeployMode {
    /// Launch the image reference as given
    Direct,

    /// Stage the image through a private registry and launch the registry tag
    Registry(Arc<dyn ContainerRegistry>),
}

/// Orchestrator tuning
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    /// Upper bound on waiting for the remote shell to exit; `None` waits forever
    pub session_close_timeout: Option<Duration>,
}

/// Result of a completed deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentOutcome {
    /// Image reference handed to the cluster
    pub launched_image: String,

    /// Whether the image went through the private registry
    pub registry_staged: bool,
}

/// Commands run on the cluster master, in order. Each depends on the one
/// before it.
pub fn mount_commands(key_file: &str) -> Vec<String> {
    vec![
        format!("chmod 600 {}", key_file),
        "eval \"$(ssh-agent -s)\"".to_string(),
        format!("ssh-add {}", key_file),
        format!("sh {} ~/{}", MOUNT_SHARES_SCRIPT, key_file),
    ]
}

/// Deployment orchestrator, good for a single run
pub struct Orchestrator {
    context: DeploymentContext,
    mode: DeployMode,
    cluster: Arc<dyn ClusterService>,
    transfer: TransferChannel,
    connector: Arc<dyn SessionConnector>,
    options: OrchestratorOptions,
    fsm: DeploymentFsm,
}

impl Orchestrator {
    pub fn new(
        context: DeploymentContext,
        mode: DeployMode,
        cluster: Arc<dyn ClusterService>,
        transfer: TransferChannel,
        connector: Arc<dyn SessionConnector>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            context,
            mode,
            cluster,
            transfer,
            connector,
            options,
            fsm: DeploymentFsm::new(),
        }
    }

    /// Get the current deployment state
    pub fn state(&self) -> &DeploymentState {
        self.fsm.state()
    }

    /// Error that ended the run, if any
    pub fn error(&self) -> Option<&str> {
        self.fsm.error()
    }

    /// Run the deployment. Fails with `InvalidState` when called twice.
    pub async fn deploy(&mut self) -> Result<DeploymentOutcome, DeployError> {
        if self.fsm.state() != &DeploymentState::Created {
            return Err(DeployError::InvalidState(format!(
                "deployment already ran (state {:?})",
                self.fsm.state()
            )));
        }

        let span = info_span!(
            "deployment",
            run_id = %generate_run_id(),
            image = %self.context.image
        );

        let result = self.run().instrument(span).await;

        if let Err(e) = &result {
            let event = if e.is_fatal() {
                DeploymentEvent::Abort(e.to_string())
            } else {
                DeploymentEvent::Fail(e.to_string())
            };
            if let Err(invalid) = self.fsm.process(event) {
                warn!("Unable to record deployment failure: {}", invalid);
            }
        }

        result
    }

    async fn run(&mut self) -> Result<DeploymentOutcome, DeployError> {
        self.advance(DeploymentEvent::Start)?;

        // Registry setup
        let registry_image = registry_image_name(&self.context.image).to_string();
        if let DeployMode::Registry(registry) = &self.mode {
            info!(
                "Staging {} through registry {} ({})",
                self.context.image, self.context.registry.name, self.context.registry.login_server
            );
            registry
                .setup_image(&self.context.image, &registry_image)
                .await?;
        }
        self.advance(DeploymentEvent::RegistryReady)?;

        // Transfers
        println!("Mounting file share on all machines in cluster...");
        let address = self.cluster.master_address().await?;
        let key_file = self.transfer_files(&address).await?;
        self.advance(DeploymentEvent::Transferred)?;

        // Remote session
        let transcript = self.run_mount_session(&address, &key_file).await?;
        self.advance(DeploymentEvent::SessionClosed)?;

        // Reporting never fails the run; remote errors are only printed
        println!("Finished mounting shares.");
        print_output("Stdout:", &transcript.stdout);
        print_output("Stderr:", &transcript.stderr);
        drop(transcript);
        self.advance(DeploymentEvent::Reported)?;

        // Launch
        let outcome = match &self.mode {
            DeployMode::Direct => {
                self.cluster.launch(&self.context.image, None).await?;
                DeploymentOutcome {
                    launched_image: self.context.image.clone(),
                    registry_staged: false,
                }
            }
            DeployMode::Registry(registry) => {
                let tagged = registry.repo_tag(&registry_image);
                let credentials = registry.credentials();
                self.cluster.launch(&tagged, Some(&credentials)).await?;
                DeploymentOutcome {
                    launched_image: tagged,
                    registry_staged: true,
                }
            }
        };
        self.advance(DeploymentEvent::Launched)?;

        info!("Deployment of {} complete", outcome.launched_image);
        Ok(outcome)
    }

    /// Render the mount script and copy it, the companion script and the SSH
    /// key to the master. Returns the key's remote file name.
    async fn transfer_files(&self, address: &RemoteAddress) -> Result<String, DeployError> {
        let scripts = &self.context.scripts;
        let key = File::new(self.cluster.key_path());
        let key_file = key.basename();
        if key_file.is_empty() {
            return Err(DeployError::ConfigError(format!(
                "SSH key path {:?} has no file name",
                key.path()
            )));
        }

        let values = MountValues {
            storage_account: self.context.storage.account.clone(),
            share_name: self.context.storage.share.clone(),
            username: self.context.registry.name.clone(),
            password: SecretString::from(self.context.storage.key.expose_secret().to_string()),
        };
        let rendered = template::render(scripts.template_file().path(), &values.to_map()).await?;

        let mount_script = scripts.mount_script_file();
        mount_script.write_bytes(rendered.as_bytes()).await?;
        drop(rendered);

        let copied = self.copy_all(address, &mount_script, &key, &key_file).await;

        // The rendered script holds the storage key
        if let Err(e) = mount_script.delete().await {
            warn!("Unable to remove {:?}: {}", mount_script.path(), e);
        }

        copied.map(|_| key_file)
    }

    async fn copy_all(
        &self,
        address: &RemoteAddress,
        mount_script: &File,
        key: &File,
        key_file: &str,
    ) -> Result<(), DeployError> {
        self.transfer
            .transfer(mount_script.path(), "", address)
            .await?;
        self.transfer
            .transfer(self.context.scripts.mount_shares_file().path(), "", address)
            .await?;
        self.transfer.transfer(key.path(), key_file, address).await?;
        Ok(())
    }

    /// Run the mount commands in one session; the session is released on
    /// every path out of this function.
    async fn run_mount_session(
        &self,
        address: &RemoteAddress,
        key_file: &str,
    ) -> Result<SessionTranscript, DeployError> {
        let mut session = ScopedSession::open(self.connector.as_ref(), address).await?;

        let commands = mount_commands(key_file);
        if let Some((mount, setup)) = commands.split_last() {
            for command in setup {
                session.write_command(command).await?;
            }
            println!("Running mountShares on remote master. Cmd:\n{}", mount);
            session.write_command(mount).await?;
        }

        Ok(session.close(self.options.session_close_timeout).await?)
    }

    fn advance(&mut self, event: DeploymentEvent) -> Result<(), DeployError> {
        self.fsm.process(event).map_err(DeployError::InvalidState)
    }
}
