//! Scoped session tests

use std::time::Duration;

use acsdeploy::deploy::cluster::RemoteAddress;
use acsdeploy::deploy::session::ScopedSession;
use acsdeploy::errors::SessionError;

use crate::mocks::MockConnector;

#[tokio::test]
async fn test_commands_written_in_order() {
    let connector = MockConnector::default();
    let address = RemoteAddress::new("azureuser@master");

    let mut session = ScopedSession::open(&connector, &address).await.unwrap();
    session.write_command("chmod 600 id_rsa").await.unwrap();
    session.write_command("ssh-add id_rsa\n").await.unwrap();
    let transcript = session.close(None).await.unwrap();

    assert_eq!(
        connector.log.writes(),
        vec!["chmod 600 id_rsa\n".to_string(), "ssh-add id_rsa\n".to_string()]
    );
    assert_eq!(
        String::from_utf8(transcript.stdout).unwrap(),
        "chmod 600 id_rsa\nssh-add id_rsa\nexit\n"
    );
    assert_eq!(connector.log.releases(), 1);
}

#[tokio::test]
async fn test_released_once_when_write_fails() {
    let connector = MockConnector {
        fail_write_at: Some(1),
        ..Default::default()
    };
    let address = RemoteAddress::new("azureuser@master");

    let result = async {
        let mut session = ScopedSession::open(&connector, &address).await?;
        session.write_command("chmod 600 id_rsa").await?;
        session.write_command("ssh-add id_rsa").await?;
        session.close(Some(Duration::from_secs(5))).await
    }
    .await;

    assert!(matches!(result, Err(SessionError::Write { .. })));
    assert_eq!(connector.log.writes().len(), 1);
    assert_eq!(connector.log.releases(), 1);
}

#[tokio::test]
async fn test_refused_open_has_nothing_to_release() {
    let connector = MockConnector {
        refuse: true,
        ..Default::default()
    };

    let err = ScopedSession::open(&connector, &RemoteAddress::new("azureuser@master"))
        .await
        .err()
        .unwrap();

    assert!(matches!(err, SessionError::Open { .. }));
    assert_eq!(connector.log.releases(), 0);
}
