//! Common test utilities for integration tests
//!
//! Shared infrastructure: RSA signing keys published as a JWK set behind a
//! wiremock server, identity token minting, and throwaway certificate
//! authorities built with rcgen.

#![allow(dead_code)]

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CustomExtension, DnType, IsCa, KeyPair,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const ISSUER: &str = "https://appleid.apple.com";
pub const CLIENT_ID: &str = "com.wellnest.app";
pub const KEYS_PATH: &str = "/auth/keys";

/// RSA signing key with its public JWK
pub struct TestRsaKey {
    pub kid: String,
    pub private_pem: String,
}

impl TestRsaKey {
    pub fn generate(kid: &str) -> Self {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("Failed to generate RSA key");
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("Failed to encode private key")
            .to_string();
        Self {
            kid: kid.to_string(),
            private_pem,
        }
    }

    /// Same private key published under another kid
    pub fn with_kid(&self, kid: &str) -> Self {
        Self {
            kid: kid.to_string(),
            private_pem: self.private_pem.clone(),
        }
    }

    pub fn jwk(&self) -> Value {
        use rsa::pkcs8::DecodePrivateKey;
        let private_key =
            RsaPrivateKey::from_pkcs8_pem(&self.private_pem).expect("Invalid RSA test key");
        json!({
            "kty": "RSA",
            "kid": self.kid,
            "use": "sig",
            "alg": "RS256",
            "n": URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be()),
        })
    }

    /// Sign `claims` as RS256 with this key's kid in the header
    pub fn sign(&self, claims: &Value) -> String {
        let key = EncodingKey::from_rsa_pem(self.private_pem.as_bytes()).expect("Invalid RSA key");
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        encode(&header, claims, &key).expect("Failed to encode test JWT")
    }
}

// RSA key generation is slow; share two keys across all tests in a binary.
pub static PRIMARY_KEY: LazyLock<TestRsaKey> = LazyLock::new(|| TestRsaKey::generate("abc"));
pub static OTHER_KEY: LazyLock<TestRsaKey> = LazyLock::new(|| TestRsaKey::generate("other"));

/// Get current Unix timestamp
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs() as i64
}

/// Identity token claims with standard fields
pub fn identity_claims(sub: &str, exp_offset_secs: i64) -> Value {
    let now = current_timestamp();
    json!({
        "iss": ISSUER,
        "aud": CLIENT_ID,
        "sub": sub,
        "iat": now,
        "exp": now + exp_offset_secs,
        "email": "x7k2@privaterelay.appleid.com",
        "email_verified": "true",
        "is_private_email": "true",
    })
}

/// Key set endpoint mock
pub struct MockKeyServer {
    pub server: MockServer,
}

impl MockKeyServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn keys_url(&self) -> String {
        format!("{}{}", self.server.uri(), KEYS_PATH)
    }

    /// Serve `jwks`, expecting exactly `expected_fetches` requests
    pub async fn serve_keys(&self, jwks: &[Value], expected_fetches: u64) {
        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": jwks })))
            .expect(expected_fetches)
            .mount(&self.server)
            .await;
    }

    /// Serve `jwks` for the first `times` requests only
    pub async fn serve_keys_times(&self, jwks: &[Value], times: u64) {
        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": jwks })))
            .up_to_n_times(times)
            .expect(times)
            .mount(&self.server)
            .await;
    }

    pub async fn serve_status(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }
}

/// OID arcs of the Apple marker extensions
pub const LEAF_MARKER: &[u64] = &[1, 2, 840, 113_635, 100, 6, 11, 1];
pub const INTERMEDIATE_MARKER: &[u64] = &[1, 2, 840, 113_635, 100, 6, 2, 1];

/// Root, intermediate and leaf certificates with their keys
pub struct TestPki {
    pub root: Certificate,
    pub root_key: KeyPair,
    pub intermediate: Certificate,
    pub intermediate_key: KeyPair,
    pub leaf: Certificate,
    pub leaf_key: KeyPair,
}

fn marker(oid: &[u64]) -> CustomExtension {
    // DER NULL, as Apple encodes the marker extensions
    CustomExtension::from_oid_content(oid, vec![0x05, 0x00])
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
}

impl TestPki {
    /// Chain with default (very wide) validity windows
    pub fn new(root_name: &str) -> Self {
        Self::with_leaf_params(root_name, Self::leaf_params())
    }

    pub fn leaf_params() -> CertificateParams {
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
        params
            .distinguished_name
            .push(DnType::CommonName, "Prod ECC Mac App Store and iTunes Store Receipt Signing");
        params.custom_extensions.push(marker(LEAF_MARKER));
        params
    }

    pub fn with_leaf_params(root_name: &str, leaf_params: CertificateParams) -> Self {
        let root_key = KeyPair::generate().expect("root key");
        let root = ca_params(root_name).self_signed(&root_key).expect("root cert");

        let intermediate_key = KeyPair::generate().expect("intermediate key");
        let mut intermediate_params =
            ca_params("Apple Worldwide Developer Relations Certification Authority");
        intermediate_params
            .custom_extensions
            .push(marker(INTERMEDIATE_MARKER));
        let intermediate = intermediate_params
            .signed_by(&intermediate_key, &root, &root_key)
            .expect("intermediate cert");

        let leaf_key = KeyPair::generate().expect("leaf key");
        let leaf = leaf_params
            .signed_by(&leaf_key, &intermediate, &intermediate_key)
            .expect("leaf cert");

        Self {
            root,
            root_key,
            intermediate,
            intermediate_key,
            leaf,
            leaf_key,
        }
    }

    /// `x5c` header value: leaf, intermediate, root
    pub fn x5c(&self) -> Vec<String> {
        [&self.leaf, &self.intermediate, &self.root]
            .iter()
            .map(|cert| STANDARD.encode(cert.der()))
            .collect()
    }

    pub fn root_der(&self) -> Vec<u8> {
        self.root.der().to_vec()
    }

    /// Sign `claims` as ES256 with the leaf key, embedding `x5c`
    pub fn sign(&self, claims: &Value, x5c: Vec<String>) -> String {
        let key = EncodingKey::from_ec_der(&self.leaf_key.serialize_der());
        let mut header = Header::new(Algorithm::ES256);
        header.x5c = Some(x5c);
        encode(&header, claims, &key).expect("Failed to encode signed payload")
    }
}
