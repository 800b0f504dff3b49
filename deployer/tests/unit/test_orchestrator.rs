//! End-to-end orchestrator tests against in-memory collaborators

use std::sync::Arc;

use acsdeploy::deploy::fsm::DeploymentState;
use acsdeploy::deploy::orchestrator::{
    DeployMode, DeploymentContext, Orchestrator, OrchestratorOptions, RegistryIdentity,
    StorageIdentity,
};
use acsdeploy::deploy::session::{SessionConnector, SshConnector};
use acsdeploy::deploy::transfer::TransferChannel;
use acsdeploy::errors::DeployError;
use acsdeploy::storage::layout::ScriptLayout;
use secrecy::SecretString;

use crate::mocks::{MockCluster, MockConnector, MockCopier, MockRegistry, Workspace};

const MASTER: &str = "azureuser@master.example.com";

struct Harness {
    workspace: Workspace,
    copier: Arc<MockCopier>,
    connector: Arc<MockConnector>,
    cluster: Arc<MockCluster>,
}

impl Harness {
    async fn new(copier: MockCopier, connector: MockConnector) -> Self {
        let workspace = Workspace::new().await;
        let cluster = Arc::new(MockCluster::new(MASTER, workspace.key_path.clone()));
        Self {
            workspace,
            copier: Arc::new(copier),
            connector: Arc::new(connector),
            cluster,
        }
    }

    fn orchestrator(&self, mode: DeployMode) -> Orchestrator {
        self.orchestrator_with(mode, self.connector.clone())
    }

    fn orchestrator_with(
        &self,
        mode: DeployMode,
        connector: Arc<dyn SessionConnector>,
    ) -> Orchestrator {
        let context = DeploymentContext {
            image: "mesosphere/simple-docker".to_string(),
            storage: StorageIdentity {
                account: "acct1".to_string(),
                share: "share1".to_string(),
                key: SecretString::from("pw1".to_string()),
            },
            registry: RegistryIdentity {
                name: "user1".to_string(),
                login_server: "sample.azurecr.io".to_string(),
            },
            scripts: ScriptLayout::new(self.workspace.scripts.clone()),
        };

        Orchestrator::new(
            context,
            mode,
            self.cluster.clone(),
            TransferChannel::new(self.copier.clone()),
            connector,
            OrchestratorOptions::default(),
        )
    }
}

#[tokio::test]
async fn test_direct_deployment() {
    let harness = Harness::new(MockCopier::default(), MockConnector::default()).await;
    let mut orchestrator = harness.orchestrator(DeployMode::Direct);

    let outcome = orchestrator.deploy().await.unwrap();

    assert_eq!(outcome.launched_image, "mesosphere/simple-docker");
    assert!(!outcome.registry_staged);
    assert_eq!(orchestrator.state(), &DeploymentState::Done);

    // Rendered script, companion script, key
    let copies = harness.copier.copies.lock().unwrap().clone();
    assert_eq!(copies.len(), 3);
    assert!(copies[0].0.ends_with("cifsMount.sh"));
    assert!(copies[1].0.ends_with("mountShares.sh"));
    assert_eq!(copies[2].1, format!("{}:./id_rsa", MASTER));

    let rendered = String::from_utf8(copies[0].2.clone()).unwrap();
    assert!(rendered.contains("//acct1.file.core.windows.net/share1"));
    assert!(rendered.contains("username=user1,password=pw1"));

    // The rendered copy holds the key and is not left behind
    assert!(!harness.workspace.scripts.join("cifsMount.sh").exists());

    assert_eq!(
        harness.cluster.launches(),
        vec![("mesosphere/simple-docker".to_string(), None)]
    );
}

#[tokio::test]
async fn test_session_runs_mount_commands_in_order() {
    let harness = Harness::new(MockCopier::default(), MockConnector::default()).await;
    let mut orchestrator = harness.orchestrator(DeployMode::Direct);

    orchestrator.deploy().await.unwrap();

    let writes = harness.connector.log.writes();
    assert_eq!(writes.len(), 4);
    assert_eq!(writes[0], "chmod 600 id_rsa\n");
    assert!(writes[1].contains("ssh-agent -s"));
    assert_eq!(writes[2], "ssh-add id_rsa\n");
    assert_eq!(writes[3], "sh mountShares.sh ~/id_rsa\n");

    assert_eq!(harness.connector.log.opens(), 1);
    assert_eq!(harness.connector.log.releases(), 1);
}

#[tokio::test]
async fn test_failed_copy_aborts_before_session() {
    let harness = Harness::new(MockCopier::failing_at(1), MockConnector::default()).await;
    let mut orchestrator = harness.orchestrator(DeployMode::Direct);

    let err = orchestrator.deploy().await.unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(err.exit_code(), 1);
    assert!(err
        .remediation()
        .unwrap()
        .ends_with(&format!("ssh {}", MASTER)));

    // No further copies, no session, no launch
    assert_eq!(harness.copier.destinations().len(), 2);
    assert_eq!(harness.connector.log.opens(), 0);
    assert!(harness.cluster.launches().is_empty());

    assert_eq!(orchestrator.state(), &DeploymentState::Aborted);
    assert!(orchestrator.error().is_some());
    assert!(!harness.workspace.scripts.join("cifsMount.sh").exists());
}

#[tokio::test]
async fn test_broken_session_released_and_aborted() {
    let connector = MockConnector {
        fail_write_at: Some(2),
        ..Default::default()
    };
    let harness = Harness::new(MockCopier::default(), connector).await;
    let mut orchestrator = harness.orchestrator(DeployMode::Direct);

    let err = orchestrator.deploy().await.unwrap_err();

    assert!(matches!(err, DeployError::Session(_)));
    assert_eq!(err.exit_code(), 1);
    assert!(err.remediation().is_none());
    assert_eq!(harness.connector.log.releases(), 1);
    assert_eq!(orchestrator.state(), &DeploymentState::Aborted);
    assert!(harness.cluster.launches().is_empty());
}

#[tokio::test]
async fn test_registry_mode_launches_registry_tag() {
    let harness = Harness::new(MockCopier::default(), MockConnector::default()).await;
    let registry = Arc::new(MockRegistry::default());
    let mut orchestrator = harness.orchestrator(DeployMode::Registry(registry.clone()));

    let outcome = orchestrator.deploy().await.unwrap();

    assert_eq!(outcome.launched_image, "sample.azurecr.io/simple-docker");
    assert!(outcome.registry_staged);
    assert_eq!(
        registry.staged.lock().unwrap().clone(),
        vec![(
            "mesosphere/simple-docker".to_string(),
            "simple-docker".to_string()
        )]
    );
    assert_eq!(
        harness.cluster.launches(),
        vec![(
            "sample.azurecr.io/simple-docker".to_string(),
            Some("sample".to_string())
        )]
    );
}

#[tokio::test]
async fn test_registry_failure_is_not_fatal() {
    let harness = Harness::new(MockCopier::default(), MockConnector::default()).await;
    let registry = Arc::new(MockRegistry {
        fail: true,
        ..Default::default()
    });
    let mut orchestrator = harness.orchestrator(DeployMode::Registry(registry));

    let err = orchestrator.deploy().await.unwrap_err();

    assert!(!err.is_fatal());
    assert_eq!(err.exit_code(), 2);
    assert_eq!(orchestrator.state(), &DeploymentState::Failed);
    assert!(harness.copier.destinations().is_empty());
}

#[tokio::test]
async fn test_template_error_fails_run() {
    let harness = Harness::new(MockCopier::default(), MockConnector::default()).await;
    tokio::fs::write(
        harness.workspace.scripts.join("cifsMountTemplate.sh"),
        "mount {region}\n",
    )
    .await
    .unwrap();
    let mut orchestrator = harness.orchestrator(DeployMode::Direct);

    let err = orchestrator.deploy().await.unwrap_err();

    assert!(matches!(err, DeployError::Template(_)));
    assert_eq!(orchestrator.state(), &DeploymentState::Failed);
    assert!(harness.copier.destinations().is_empty());
}

#[tokio::test]
async fn test_second_deploy_rejected() {
    let harness = Harness::new(MockCopier::default(), MockConnector::default()).await;
    let mut orchestrator = harness.orchestrator(DeployMode::Direct);

    orchestrator.deploy().await.unwrap();
    let err = orchestrator.deploy().await.unwrap_err();

    assert!(matches!(err, DeployError::InvalidState(_)));
    assert_eq!(orchestrator.state(), &DeploymentState::Done);
    assert_eq!(harness.cluster.launches().len(), 1);
}

/// `ssh` stand-in that drains its input, then fails like a refused connection
#[cfg(unix)]
async fn refusing_ssh(dir: &std::path::Path) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("ssh");
    tokio::fs::write(
        &path,
        "#!/bin/sh\n\
cat > /dev/null\n\
echo \"ssh: connect to host master.example.com port 2200: Connection refused\" >&2\n\
exit 255\n",
    )
    .await
    .unwrap();
    tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .await
        .unwrap();
    path
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreachable_master_aborts_run() {
    let harness = Harness::new(MockCopier::default(), MockConnector::default()).await;
    let ssh = refusing_ssh(&harness.workspace.root).await;
    let connector = Arc::new(SshConnector::new(2200, None).with_program(ssh));
    let mut orchestrator = harness.orchestrator_with(DeployMode::Direct, connector);

    let err = orchestrator.deploy().await.unwrap_err();

    assert!(matches!(err, DeployError::Session(_)));
    assert!(err.is_fatal());
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("Connection refused"));
    assert_eq!(orchestrator.state(), &DeploymentState::Aborted);
    assert!(harness.cluster.launches().is_empty());
}
