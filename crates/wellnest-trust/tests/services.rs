//! Startup wiring from environment-style configuration

mod common;

use common::TestPki;
use p256::SecretKey;
use p256::pkcs8::{EncodePrivateKey, LineEnding};
use std::collections::HashMap;
use std::path::PathBuf;
use wellnest_trust::{AuthError, TrustConfig, TrustServices};

struct RootFile(PathBuf);

impl RootFile {
    fn write(pki: &TestPki, name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("wellnest-{name}-{}.pem", std::process::id()));
        std::fs::write(&path, pki.root.pem()).unwrap();
        Self(path)
    }
}

impl Drop for RootFile {
    fn drop(&mut self) {
        std::fs::remove_file(&self.0).ok();
    }
}

fn config(vars: HashMap<&'static str, String>) -> Result<TrustConfig, AuthError> {
    TrustConfig::from_lookup(move |name: &str| vars.get(name).cloned())
}

#[test]
fn test_services_built_with_client_assertion() {
    let pki = TestPki::new("Apple Root CA - G3");
    let root = RootFile::write(&pki, "services-full");
    let private_key = SecretKey::random(&mut rand::rngs::OsRng)
        .to_pkcs8_pem(LineEnding::LF)
        .unwrap()
        .to_string();

    let config = config(HashMap::from([
        ("APPLE_CLIENT_IDS", common::CLIENT_ID.to_string()),
        ("APPLE_ROOT_CERTS", root.0.display().to_string()),
        ("APPLE_TEAM_ID", "TEAM123456".to_string()),
        ("APPLE_KEY_ID", "KEY1234567".to_string()),
        ("APPLE_PRIVATE_KEY", private_key),
    ]))
    .unwrap();

    let services = TrustServices::from_config(&config).unwrap();
    assert_eq!(services.chain_validator.anchors().len(), 1);
    assert!(services.apple_id.is_some());

    let issuer = services.client_assertion.expect("client assertion issuer");
    assert_eq!(issuer.client_id(), common::CLIENT_ID);
    assert!(issuer.issue().is_ok());

    // The validator built at startup accepts chains rooted in the file.
    assert!(services.chain_validator.validate(&pki.x5c()).is_ok());
}

#[test]
fn test_services_without_client_assertion() {
    let pki = TestPki::new("Apple Root CA - G3");
    let root = RootFile::write(&pki, "services-minimal");

    let config = config(HashMap::from([
        ("APPLE_CLIENT_IDS", common::CLIENT_ID.to_string()),
        ("APPLE_ROOT_CERTS", root.0.display().to_string()),
    ]))
    .unwrap();

    let services = TrustServices::from_config(&config).unwrap();
    assert!(services.client_assertion.is_none());
    assert!(services.apple_id.is_none());
}

#[test]
fn test_unreadable_root_is_fatal() {
    let config = config(HashMap::from([
        ("APPLE_CLIENT_IDS", common::CLIENT_ID.to_string()),
        ("APPLE_ROOT_CERTS", "/nonexistent/AppleRootCA-G3.cer".to_string()),
    ]))
    .unwrap();

    assert!(matches!(
        TrustServices::from_config(&config),
        Err(AuthError::Configuration(_))
    ));
}

#[test]
fn test_unparseable_private_key_is_fatal() {
    let pki = TestPki::new("Apple Root CA - G3");
    let root = RootFile::write(&pki, "services-badkey");

    let config = config(HashMap::from([
        ("APPLE_CLIENT_IDS", common::CLIENT_ID.to_string()),
        ("APPLE_ROOT_CERTS", root.0.display().to_string()),
        ("APPLE_TEAM_ID", "TEAM123456".to_string()),
        ("APPLE_KEY_ID", "KEY1234567".to_string()),
        ("APPLE_PRIVATE_KEY", "not a key".to_string()),
    ]))
    .unwrap();

    assert!(matches!(
        TrustServices::from_config(&config),
        Err(AuthError::Configuration(_))
    ));
}
