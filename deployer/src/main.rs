//! acsdeploy - Entry Point
//!
//! Mounts the storage share on every cluster node, then launches the
//! container image on the cluster.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use secrecy::SecretString;
use tracing::{error, info, warn};

use acsdeploy::deploy::cluster::{AppOptions, MarathonCluster, RemoteAddress};
use acsdeploy::deploy::docker::DockerRegistry;
use acsdeploy::deploy::orchestrator::{
    DeployMode, DeploymentContext, DeploymentOutcome, Orchestrator, OrchestratorOptions,
    RegistryIdentity, StorageIdentity,
};
use acsdeploy::deploy::session::SshConnector;
use acsdeploy::deploy::transfer::{ScpCopier, TransferChannel};
use acsdeploy::errors::DeployError;
use acsdeploy::filesys::file::File;
use acsdeploy::http::client::HttpClient;
use acsdeploy::logs::{init_logging, LogLevel, LogOptions};
use acsdeploy::storage::layout::ScriptLayout;
use acsdeploy::storage::settings::Settings;
use acsdeploy::utils::version_info;

const DEFAULT_CONFIG_FILE: &str = "deploy.json";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli_args = parse_args(env::args().skip(1));

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("Unable to print version: {}", e),
        }
        return ExitCode::SUCCESS;
    }

    let mut settings = match load_settings(&cli_args).await {
        Ok(settings) => settings,
        Err(e) => return report_failure(&e),
    };

    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    if let Err(e) = settings.validate() {
        return report_failure(&e);
    }

    info!(
        "Deploying {} to {} (registry staging: {})",
        settings.image, settings.cluster.master_address, settings.use_registry
    );

    let public_endpoint = settings.cluster.public_endpoint.clone();
    let result = match build_orchestrator(&mut settings) {
        Ok(mut orchestrator) => orchestrator.deploy().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => {
            report_success(&outcome);
            if let Some(endpoint) = public_endpoint {
                probe_endpoint(&endpoint).await;
            }
            ExitCode::SUCCESS
        }
        Err(e) => report_failure(&e),
    }
}

/// Parse `--key=value` and `--flag` arguments
fn parse_args(args: impl Iterator<Item = String>) -> HashMap<String, String> {
    let mut cli_args = HashMap::new();

    for arg in args {
        if let Some((key, value)) = arg.split_once('=') {
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    cli_args
}

/// Read the settings file, then apply CLI overrides and secret variables
async fn load_settings(cli_args: &HashMap<String, String>) -> Result<Settings, DeployError> {
    let config_file = File::new(
        cli_args
            .get("config")
            .map(String::as_str)
            .unwrap_or(DEFAULT_CONFIG_FILE),
    );

    let mut settings = if config_file.exists().await {
        Settings::load(&config_file).await.map_err(|e| {
            DeployError::ConfigError(format!(
                "Unable to read settings file {:?}: {}",
                config_file.path(),
                e
            ))
        })?
    } else if cli_args.contains_key("config") {
        return Err(DeployError::ConfigError(format!(
            "Settings file {:?} not found",
            config_file.path()
        )));
    } else {
        Settings::default()
    };

    apply_overrides(&mut settings, cli_args)?;
    settings.apply_secret_env(|name| env::var(name).ok());

    Ok(settings)
}

fn apply_overrides(
    settings: &mut Settings,
    cli_args: &HashMap<String, String>,
) -> Result<(), DeployError> {
    if let Some(image) = cli_args.get("image") {
        settings.image = image.clone();
    }
    if cli_args.contains_key("use-registry") || cli_args.contains_key("use-acr") {
        settings.use_registry = true;
    }
    if let Some(master) = cli_args.get("master") {
        settings.cluster.master_address = master.clone();
    }
    if let Some(dir) = cli_args.get("scripts-dir") {
        settings.scripts_dir = dir.into();
    }
    if let Some(level) = cli_args.get("log-level") {
        settings.log_level = level
            .parse::<LogLevel>()
            .map_err(DeployError::ConfigError)?;
    }
    Ok(())
}

/// Assemble the collaborators and the orchestrator from validated settings
fn build_orchestrator(settings: &mut Settings) -> Result<Orchestrator, DeployError> {
    let storage_key = take_secret(&mut settings.storage.key, "storage.key")?;
    let cluster_settings = &settings.cluster;
    let key_path = cluster_settings.key_path.clone();

    let http_client = HttpClient::new(&cluster_settings.marathon_url)?;
    let cluster = Arc::new(MarathonCluster::new(
        RemoteAddress::new(cluster_settings.master_address.clone()),
        key_path.clone(),
        http_client,
        AppOptions {
            id: cluster_settings.app_id.clone(),
            cpus: cluster_settings.cpus,
            mem: cluster_settings.mem,
            instances: cluster_settings.instances,
            container_port: cluster_settings.port,
            host_port: cluster_settings.port,
        },
    ));

    let transfer = TransferChannel::new(Arc::new(ScpCopier::new(
        cluster_settings.ssh_port,
        Some(key_path.clone()),
    )));
    let connector = Arc::new(SshConnector::new(cluster_settings.ssh_port, Some(key_path)));

    let mode = if settings.use_registry {
        let password = take_secret(&mut settings.registry.password, "registry.password")?;
        DeployMode::Registry(Arc::new(DockerRegistry::new(
            settings.registry.login_server.clone(),
            settings.registry.username.clone(),
            password,
            settings.registry.auth_archive_uri.clone(),
        )))
    } else {
        DeployMode::Direct
    };

    let context = DeploymentContext {
        image: settings.image.clone(),
        storage: StorageIdentity {
            account: settings.storage.account.clone(),
            share: settings.storage.share.clone(),
            key: storage_key,
        },
        registry: RegistryIdentity {
            name: settings.registry.name.clone(),
            login_server: settings.registry.login_server.clone(),
        },
        scripts: ScriptLayout::new(settings.scripts_dir.clone()),
    };

    let options = OrchestratorOptions {
        session_close_timeout: settings.session_close_timeout(),
    };

    Ok(Orchestrator::new(
        context, mode, cluster, transfer, connector, options,
    ))
}

fn take_secret(
    secret: &mut Option<SecretString>,
    name: &str,
) -> Result<SecretString, DeployError> {
    secret
        .take()
        .ok_or_else(|| DeployError::ConfigError(format!("missing settings: {}", name)))
}

/// Print the public endpoint's landing page
async fn probe_endpoint(endpoint: &str) {
    info!("Probing {}", endpoint);

    let client = match HttpClient::new(endpoint) {
        Ok(client) => client,
        Err(e) => {
            warn!("Unable to probe {}: {}", endpoint, e);
            return;
        }
    };

    match client.get_text("").await {
        Ok(body) => println!("{}", body),
        Err(e) => warn!("Endpoint {} not reachable yet: {}", endpoint, e),
    }
}

fn report_success(outcome: &DeploymentOutcome) {
    println!(
        "\n{} Deployed {}{}",
        "[SUCCESS]".green().bold(),
        outcome.launched_image,
        if outcome.registry_staged {
            " from the private registry"
        } else {
            ""
        }
    );
}

/// Print the failure report to stderr and pick the exit code
fn report_failure(err: &DeployError) -> ExitCode {
    error!("Deployment failed: {}", err);
    eprint!("{}", failure_report(err));
    ExitCode::from(err.exit_code())
}

/// The failure trace and, for broken copies, how to check SSH access
fn failure_report(err: &DeployError) -> String {
    let mut report = format!("\n{} {}\n{}\n", "[ERROR]".red().bold(), err, err.trace());

    if let Some(hint) = err.remediation() {
        report.push_str("\nIt looks like an scp command failed.\n");
        report.push_str(&hint);
        report.push('\n');
    }

    report
}
