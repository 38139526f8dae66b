//! Common test utilities for integration tests
//!
//! A throwaway Apple-shaped certificate authority and builders for signed
//! App Store payloads.

#![allow(dead_code)]

use base64::{Engine as _, engine::general_purpose::STANDARD};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CustomExtension, DnType, IsCa, KeyPair,
};
use serde_json::{Value, json};
use std::sync::Arc;
use wellnest_appstore::{AppStoreConfig, Environment, SignedDataVerifier};
use wellnest_trust::{CertChainValidator, ChainPolicy, TrustAnchor};

pub const BUNDLE_ID: &str = "com.wellnest.app";
pub const APP_APPLE_ID: i64 = 1_234_567_890;

/// 2023-11-14T22:13:20Z in milliseconds
pub const SIGNED_DATE_MS: i64 = 1_700_000_000_000;

const LEAF_MARKER: &[u64] = &[1, 2, 840, 113_635, 100, 6, 11, 1];
const INTERMEDIATE_MARKER: &[u64] = &[1, 2, 840, 113_635, 100, 6, 2, 1];

fn marker(oid: &[u64]) -> CustomExtension {
    CustomExtension::from_oid_content(oid, vec![0x05, 0x00])
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
}

/// Root, intermediate and leaf with the App Store marker extensions
pub struct AppStorePki {
    root: Certificate,
    intermediate: Certificate,
    leaf: Certificate,
    leaf_key: KeyPair,
}

impl AppStorePki {
    pub fn new() -> Self {
        Self::with_leaf_validity(None)
    }

    /// Leaf valid only between the two `(year, month, day)` dates
    pub fn with_leaf_validity(window: Option<((i32, u8, u8), (i32, u8, u8))>) -> Self {
        let root_key = KeyPair::generate().expect("root key");
        let root = ca_params("Apple Root CA - G3")
            .self_signed(&root_key)
            .expect("root cert");

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
        let mut leaf_params = CertificateParams::new(Vec::<String>::new()).expect("params");
        leaf_params
            .distinguished_name
            .push(DnType::CommonName, "Prod ECC Mac App Store and iTunes Store Receipt Signing");
        leaf_params.custom_extensions.push(marker(LEAF_MARKER));
        if let Some(((fy, fm, fd), (ty, tm, td))) = window {
            leaf_params.not_before = rcgen::date_time_ymd(fy, fm, fd);
            leaf_params.not_after = rcgen::date_time_ymd(ty, tm, td);
        }
        let leaf = leaf_params
            .signed_by(&leaf_key, &intermediate, &intermediate_key)
            .expect("leaf cert");

        Self {
            root,
            intermediate,
            leaf,
            leaf_key,
        }
    }

    pub fn chain_validator(&self) -> Arc<CertChainValidator> {
        let anchor = TrustAnchor::from_der(self.root.der().to_vec()).expect("anchor");
        Arc::new(CertChainValidator::new(vec![anchor], ChainPolicy::apple()).expect("validator"))
    }

    pub fn verifier(&self, config: AppStoreConfig) -> SignedDataVerifier {
        SignedDataVerifier::new(self.chain_validator(), config).expect("verifier")
    }

    /// Sign `payload` as ES256 with the leaf key and the full chain in `x5c`
    pub fn sign(&self, payload: &Value) -> String {
        let key = EncodingKey::from_ec_der(&self.leaf_key.serialize_der());
        let mut header = Header::new(Algorithm::ES256);
        header.x5c = Some(
            [&self.leaf, &self.intermediate, &self.root]
                .iter()
                .map(|cert| STANDARD.encode(cert.der()))
                .collect(),
        );
        encode(&header, payload, &key).expect("Failed to encode signed payload")
    }
}

pub fn sandbox_config() -> AppStoreConfig {
    AppStoreConfig::new(BUNDLE_ID).with_environment(Environment::Sandbox)
}

pub fn transaction(environment: &str) -> Value {
    json!({
        "transactionId": "2000000456",
        "originalTransactionId": "2000000001",
        "webOrderLineItemId": "2000000000123",
        "bundleId": BUNDLE_ID,
        "productId": "com.wellnest.premium.monthly",
        "subscriptionGroupIdentifier": "21345678",
        "purchaseDate": SIGNED_DATE_MS - 60_000,
        "originalPurchaseDate": SIGNED_DATE_MS - 86_400_000,
        "expiresDate": SIGNED_DATE_MS + 2_592_000_000i64,
        "quantity": 1,
        "type": "Auto-Renewable Subscription",
        "inAppOwnershipType": "PURCHASED",
        "signedDate": SIGNED_DATE_MS,
        "environment": environment,
        "transactionReason": "PURCHASE",
        "storefront": "DEU",
        "storefrontId": "143443",
        "price": 4990,
        "currency": "EUR"
    })
}

pub fn renewal_info(environment: &str) -> Value {
    json!({
        "originalTransactionId": "2000000001",
        "productId": "com.wellnest.premium.monthly",
        "autoRenewProductId": "com.wellnest.premium.monthly",
        "autoRenewStatus": 1,
        "signedDate": SIGNED_DATE_MS,
        "environment": environment,
        "recentSubscriptionStartDate": SIGNED_DATE_MS - 86_400_000,
        "renewalDate": SIGNED_DATE_MS + 2_592_000_000i64
    })
}

pub fn notification(data: Value) -> Value {
    json!({
        "notificationType": "SUBSCRIBED",
        "subtype": "INITIAL_BUY",
        "notificationUUID": "002e14d5-51f5-4503-b5a8-c3a1af68eb20",
        "version": "2.0",
        "signedDate": SIGNED_DATE_MS,
        "data": data
    })
}
