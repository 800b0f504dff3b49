//! Mount template rendering tests

use std::collections::HashMap;

use acsdeploy::deploy::template::{render, render_str, MountValues, REQUIRED_KEYS};
use acsdeploy::errors::TemplateError;
use secrecy::SecretString;

use crate::mocks::{Workspace, TEMPLATE};

fn values() -> HashMap<String, String> {
    MountValues {
        storage_account: "acct1".to_string(),
        share_name: "share1".to_string(),
        username: "user1".to_string(),
        password: SecretString::from("pw1".to_string()),
    }
    .to_map()
}

#[tokio::test]
async fn test_render_template_file() {
    let workspace = Workspace::new().await;
    let rendered = render(&workspace.scripts.join("cifsMountTemplate.sh"), &values())
        .await
        .unwrap();

    assert_eq!(
        rendered.as_str(),
        "#!/bin/sh\n\
mkdir -p /mnt/share1\n\
mount -t cifs //acct1.file.core.windows.net/share1 /mnt/share1 \
-o vers=3.0,username=user1,password=pw1,dir_mode=0777\n"
    );
    assert!(!rendered.as_str().contains('\r'));
}

#[test]
fn test_render_is_deterministic() {
    let first = render_str(TEMPLATE, &values()).unwrap();
    let second = render_str(TEMPLATE, &values()).unwrap();
    assert_eq!(first.as_str(), second.as_str());
}

#[test]
fn test_placeholders_fully_substituted() {
    let rendered = render_str(TEMPLATE, &values()).unwrap().into_string();
    for key in ["{storageacct}", "{sharename}", "{username}", "{password}"] {
        assert!(!rendered.contains(key), "{} left in output", key);
    }
}

#[test]
fn test_missing_value_rejected_before_rendering() {
    for key in REQUIRED_KEYS {
        let mut partial = values();
        partial.remove(key);

        // Rejected even when the template never mentions the key
        match render_str("echo mounted\n", &partial) {
            Err(TemplateError::MissingKey(missing)) => assert_eq!(missing, key),
            other => panic!("{} accepted as missing: {:?}", key, other.map(|_| ())),
        }
    }
}

#[test]
fn test_shell_braces_escaped() {
    let rendered = render_str("echo ${{HOME}}/{sharename}\n", &values()).unwrap();
    assert_eq!(rendered.as_str(), "echo ${HOME}/share1\n");
}

#[test]
fn test_unknown_placeholder_reports_line() {
    let err = render_str("#!/bin/sh\necho {region}\n", &values()).unwrap_err();
    match err {
        TemplateError::UnknownPlaceholder { name, line } => {
            assert_eq!(name, "region");
            assert_eq!(line, 2);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_template_file() {
    let workspace = Workspace::new().await;
    let err = render(&workspace.scripts.join("absent.sh"), &values())
        .await
        .unwrap_err();
    assert!(matches!(err, TemplateError::Read { .. }));
}
