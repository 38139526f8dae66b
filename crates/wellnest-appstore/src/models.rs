//! Typed App Store payloads
//!
//! Field names follow Apple's JSON keys in camelCase; every date is a
//! millisecond timestamp decoded to UTC. Enumerated values Apple may extend
//! keep unrecognized raw values in an `Other` variant instead of failing the
//! whole payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use wellnest_trust::{ClaimError, Claims, FromClaims};

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $raw:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
            /// Value not known to this version
            Other(String),
        }

        impl $name {
            /// Map Apple's raw value
            pub fn from_raw(raw: &str) -> Self {
                match raw {
                    $( $raw => Self::$variant, )+
                    other => Self::Other(other.to_string()),
                }
            }

            /// Apple's raw value
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $raw, )+
                    Self::Other(raw) => raw,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                String::deserialize(deserializer).map(|raw| Self::from_raw(&raw))
            }
        }
    };
}

macro_rules! int_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $raw:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
            /// Value not known to this version
            Other(i64),
        }

        impl $name {
            /// Map Apple's raw value
            pub fn from_raw(raw: i64) -> Self {
                match raw {
                    $( $raw => Self::$variant, )+
                    other => Self::Other(other),
                }
            }

            /// Apple's raw value
            pub fn raw(self) -> i64 {
                match self {
                    $( Self::$variant => $raw, )+
                    Self::Other(raw) => raw,
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_i64(self.raw())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                i64::deserialize(deserializer).map(Self::from_raw)
            }
        }
    };
}

string_enum! {
    /// Server environment a payload was produced in
    pub enum Environment {
        /// Sandbox and TestFlight purchases
        Sandbox => "Sandbox",
        /// Real purchases
        Production => "Production",
        /// StoreKit testing in Xcode
        Xcode => "Xcode",
        /// Local StoreKit testing
        LocalTesting => "LocalTesting",
    }
}

impl Environment {
    /// Parse a configuration value, ignoring case
    pub fn parse_config(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Some(Self::Sandbox),
            "production" => Some(Self::Production),
            "xcode" => Some(Self::Xcode),
            "localtesting" | "local_testing" => Some(Self::LocalTesting),
            _ => None,
        }
    }
}

string_enum! {
    /// Server notification type
    pub enum NotificationType {
        ConsumptionRequest => "CONSUMPTION_REQUEST",
        DidChangeRenewalPref => "DID_CHANGE_RENEWAL_PREF",
        DidChangeRenewalStatus => "DID_CHANGE_RENEWAL_STATUS",
        DidFailToRenew => "DID_FAIL_TO_RENEW",
        DidRenew => "DID_RENEW",
        Expired => "EXPIRED",
        ExternalPurchaseToken => "EXTERNAL_PURCHASE_TOKEN",
        GracePeriodExpired => "GRACE_PERIOD_EXPIRED",
        OfferRedeemed => "OFFER_REDEEMED",
        OneTimeCharge => "ONE_TIME_CHARGE",
        PriceIncrease => "PRICE_INCREASE",
        Refund => "REFUND",
        RefundDeclined => "REFUND_DECLINED",
        RefundReversed => "REFUND_REVERSED",
        RenewalExtended => "RENEWAL_EXTENDED",
        RenewalExtension => "RENEWAL_EXTENSION",
        Revoke => "REVOKE",
        Subscribed => "SUBSCRIBED",
        /// Sent on request from App Store Connect
        Test => "TEST",
    }
}

string_enum! {
    /// Server notification subtype
    pub enum Subtype {
        InitialBuy => "INITIAL_BUY",
        Resubscribe => "RESUBSCRIBE",
        Downgrade => "DOWNGRADE",
        Upgrade => "UPGRADE",
        AutoRenewEnabled => "AUTO_RENEW_ENABLED",
        AutoRenewDisabled => "AUTO_RENEW_DISABLED",
        Voluntary => "VOLUNTARY",
        BillingRetry => "BILLING_RETRY",
        PriceIncrease => "PRICE_INCREASE",
        GracePeriod => "GRACE_PERIOD",
        BillingRecovery => "BILLING_RECOVERY",
        Pending => "PENDING",
        Accepted => "ACCEPTED",
        Summary => "SUMMARY",
        Failure => "FAILURE",
        Unreported => "UNREPORTED",
    }
}

string_enum! {
    /// In-app purchase product type
    pub enum TransactionType {
        AutoRenewableSubscription => "Auto-Renewable Subscription",
        NonConsumable => "Non-Consumable",
        Consumable => "Consumable",
        NonRenewingSubscription => "Non-Renewing Subscription",
    }
}

string_enum! {
    /// Whether the user bought the product or received it through Family Sharing
    pub enum OwnershipType {
        FamilyShared => "FAMILY_SHARED",
        Purchased => "PURCHASED",
    }
}

string_enum! {
    /// Why a transaction happened
    pub enum TransactionReason {
        /// Customer-initiated purchase
        Purchase => "PURCHASE",
        /// Automatic subscription renewal
        Renewal => "RENEWAL",
    }
}

int_enum! {
    /// Renewal status of an auto-renewable subscription
    pub enum AutoRenewStatus {
        Off => 0,
        On => 1,
    }
}

int_enum! {
    /// Why a subscription expired
    pub enum ExpirationIntent {
        /// Customer cancelled
        Voluntary => 1,
        /// Billing error
        BillingError => 2,
        /// Customer declined a price increase
        DidNotConsentToPriceIncrease => 3,
        /// Product was unavailable at renewal
        ProductNotAvailable => 4,
        /// Any other reason
        OtherReason => 5,
    }
}

int_enum! {
    /// Why the App Store refunded a transaction
    pub enum RevocationReason {
        /// Refunded for another reason
        OtherReason => 0,
        /// Refunded because of an actual or perceived issue in the app
        AppIssue => 1,
    }
}

int_enum! {
    /// Offer applied to a transaction
    pub enum OfferType {
        IntroductoryOffer => 1,
        PromotionalOffer => 2,
        SubscriptionOfferCode => 3,
        WinBackOffer => 4,
    }
}

int_enum! {
    /// Status of an auto-renewable subscription in a notification
    pub enum SubscriptionStatus {
        Active => 1,
        Expired => 2,
        BillingRetry => 3,
        BillingGracePeriod => 4,
        Revoked => 5,
    }
}

fn optional_string_enum<T>(
    claims: &Claims,
    name: &str,
    from_raw: fn(&str) -> T,
) -> Result<Option<T>, ClaimError> {
    Ok(claims.optional_str(name)?.map(from_raw))
}

fn optional_int_enum<T>(
    claims: &Claims,
    name: &str,
    from_raw: fn(i64) -> T,
) -> Result<Option<T>, ClaimError> {
    Ok(claims.optional_i64(name)?.map(from_raw))
}

fn required_environment(claims: &Claims) -> Result<Environment, ClaimError> {
    claims.required_str("environment").map(Environment::from_raw)
}

/// Verified transaction (`JWSTransaction`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    /// Unique id of this transaction
    pub transaction_id: String,
    /// Id of the original purchase this transaction belongs to
    pub original_transaction_id: String,
    /// Subscription purchase event id across devices
    pub web_order_line_item_id: Option<String>,
    /// Bundle id of the app
    pub bundle_id: String,
    /// In-app purchase product id
    pub product_id: String,
    /// Subscription group of the product
    pub subscription_group_identifier: Option<String>,
    /// When the App Store charged the account
    pub purchase_date: DateTime<Utc>,
    /// Purchase date of the original transaction
    pub original_purchase_date: Option<DateTime<Utc>>,
    /// Subscription expiry or renewal time
    pub expires_date: Option<DateTime<Utc>>,
    /// Number of consumable products purchased
    pub quantity: Option<i64>,
    /// Product type
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    /// UUID the app associated with the purchasing account
    pub app_account_token: Option<String>,
    /// Purchased directly or shared through Family Sharing
    pub in_app_ownership_type: Option<OwnershipType>,
    /// When the App Store signed this payload
    pub signed_date: DateTime<Utc>,
    /// Why the transaction was refunded or revoked
    pub revocation_reason: Option<RevocationReason>,
    /// When the transaction was refunded or revoked
    pub revocation_date: Option<DateTime<Utc>>,
    /// Whether the user upgraded to another subscription
    pub is_upgraded: Option<bool>,
    /// Promotional offer kind, if any
    pub offer_type: Option<OfferType>,
    /// Offer code or promotional offer id
    pub offer_identifier: Option<String>,
    /// Server environment that issued the transaction
    pub environment: Environment,
    /// ISO 3166-1 alpha-3 storefront country code
    pub storefront: Option<String>,
    /// App Store storefront id
    pub storefront_id: Option<String>,
    /// Purchase or renewal
    pub transaction_reason: Option<TransactionReason>,
    /// ISO 4217 currency code of `price`
    pub currency: Option<String>,
    /// Price in milliunits of `currency`
    pub price: Option<i64>,
}

impl TransactionInfo {
    /// Whether the App Store refunded or revoked this transaction
    pub fn is_revoked(&self) -> bool {
        self.revocation_date.is_some()
    }

    /// Whether the transaction grants access at `at`
    ///
    /// Non-expiring purchases stay active until revoked.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        !self.is_revoked() && self.expires_date.is_none_or(|expires| expires > at)
    }
}

impl FromClaims for TransactionInfo {
    fn from_claims(claims: &Claims) -> Result<Self, ClaimError> {
        Ok(Self {
            transaction_id: claims.required_str("transactionId")?.to_string(),
            original_transaction_id: claims.required_str("originalTransactionId")?.to_string(),
            web_order_line_item_id: claims.optional_string("webOrderLineItemId")?,
            bundle_id: claims.required_str("bundleId")?.to_string(),
            product_id: claims.required_str("productId")?.to_string(),
            subscription_group_identifier: claims.optional_string("subscriptionGroupIdentifier")?,
            purchase_date: claims.required_millis("purchaseDate")?,
            original_purchase_date: claims.optional_millis("originalPurchaseDate")?,
            expires_date: claims.optional_millis("expiresDate")?,
            quantity: claims.optional_i64("quantity")?,
            transaction_type: optional_string_enum(claims, "type", TransactionType::from_raw)?,
            app_account_token: claims.optional_string("appAccountToken")?,
            in_app_ownership_type: optional_string_enum(
                claims,
                "inAppOwnershipType",
                OwnershipType::from_raw,
            )?,
            signed_date: claims.required_millis("signedDate")?,
            revocation_reason: optional_int_enum(
                claims,
                "revocationReason",
                RevocationReason::from_raw,
            )?,
            revocation_date: claims.optional_millis("revocationDate")?,
            is_upgraded: claims.optional_bool("isUpgraded")?,
            offer_type: optional_int_enum(claims, "offerType", OfferType::from_raw)?,
            offer_identifier: claims.optional_string("offerIdentifier")?,
            environment: required_environment(claims)?,
            storefront: claims.optional_string("storefront")?,
            storefront_id: claims.optional_string("storefrontId")?,
            transaction_reason: optional_string_enum(
                claims,
                "transactionReason",
                TransactionReason::from_raw,
            )?,
            currency: claims.optional_string("currency")?,
            price: claims.optional_i64("price")?,
        })
    }
}

/// Verified subscription renewal info (`JWSRenewalInfo`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalInfo {
    /// Original transaction of the subscription
    pub original_transaction_id: String,
    /// Product the user currently subscribes to
    pub product_id: Option<String>,
    /// Product that renews at the next billing period
    pub auto_renew_product_id: Option<String>,
    /// Whether auto-renewal is on
    pub auto_renew_status: Option<AutoRenewStatus>,
    /// Why the subscription expired
    pub expiration_intent: Option<ExpirationIntent>,
    /// Whether the App Store is retrying a failed charge
    pub is_in_billing_retry_period: Option<bool>,
    /// Consent state for a price increase
    pub price_increase_status: Option<i64>,
    /// End of the billing grace period
    pub grace_period_expires_date: Option<DateTime<Utc>>,
    /// Offer applied to the next renewal
    pub offer_type: Option<OfferType>,
    /// Id of that offer
    pub offer_identifier: Option<String>,
    /// When the App Store signed this payload
    pub signed_date: DateTime<Utc>,
    /// Server environment that issued the renewal info
    pub environment: Environment,
    /// Start of the most recent run of continuous renewals
    pub recent_subscription_start_date: Option<DateTime<Utc>>,
    /// When the subscription next renews
    pub renewal_date: Option<DateTime<Utc>>,
}

impl RenewalInfo {
    /// Whether the subscription will renew at the end of the period
    pub fn will_auto_renew(&self) -> bool {
        self.auto_renew_status == Some(AutoRenewStatus::On)
    }
}

impl FromClaims for RenewalInfo {
    fn from_claims(claims: &Claims) -> Result<Self, ClaimError> {
        Ok(Self {
            original_transaction_id: claims.required_str("originalTransactionId")?.to_string(),
            product_id: claims.optional_string("productId")?,
            auto_renew_product_id: claims.optional_string("autoRenewProductId")?,
            auto_renew_status: optional_int_enum(
                claims,
                "autoRenewStatus",
                AutoRenewStatus::from_raw,
            )?,
            expiration_intent: optional_int_enum(
                claims,
                "expirationIntent",
                ExpirationIntent::from_raw,
            )?,
            is_in_billing_retry_period: claims.optional_bool("isInBillingRetryPeriod")?,
            price_increase_status: claims.optional_i64("priceIncreaseStatus")?,
            grace_period_expires_date: claims.optional_millis("gracePeriodExpiresDate")?,
            offer_type: optional_int_enum(claims, "offerType", OfferType::from_raw)?,
            offer_identifier: claims.optional_string("offerIdentifier")?,
            signed_date: claims.required_millis("signedDate")?,
            environment: required_environment(claims)?,
            recent_subscription_start_date: claims
                .optional_millis("recentSubscriptionStartDate")?,
            renewal_date: claims.optional_millis("renewalDate")?,
        })
    }
}

/// App metadata and nested signed payloads of a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// Server environment the notification applies to
    pub environment: Environment,
    /// App Store id of the app (production only)
    pub app_apple_id: Option<i64>,
    /// Bundle id of the app
    pub bundle_id: String,
    /// Build version of the app
    pub bundle_version: Option<String>,
    /// Still-signed transaction; see
    /// [`SignedDataVerifier::verify_notification_contents`](crate::SignedDataVerifier::verify_notification_contents)
    pub signed_transaction_info: Option<String>,
    /// Still-signed renewal info
    pub signed_renewal_info: Option<String>,
    /// Subscription status at the time of the notification
    pub status: Option<SubscriptionStatus>,
}

impl FromClaims for NotificationData {
    fn from_claims(claims: &Claims) -> Result<Self, ClaimError> {
        Ok(Self {
            environment: required_environment(claims)?,
            app_apple_id: claims.optional_i64("appAppleId")?,
            bundle_id: claims.required_str("bundleId")?.to_string(),
            bundle_version: claims.optional_string("bundleVersion")?,
            signed_transaction_info: claims.optional_string("signedTransactionInfo")?,
            signed_renewal_info: claims.optional_string("signedRenewalInfo")?,
            status: optional_int_enum(claims, "status", SubscriptionStatus::from_raw)?,
        })
    }
}

/// Outcome of a subscription-renewal-date extension request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSummary {
    /// Id of the renewal-date extension request
    pub request_identifier: String,
    /// Server environment the request ran in
    pub environment: Environment,
    /// App Store id of the app (production only)
    pub app_apple_id: Option<i64>,
    /// Bundle id of the app
    pub bundle_id: String,
    /// Subscription product the request covered
    pub product_id: String,
    /// Subscriptions extended
    pub succeeded_count: i64,
    /// Subscriptions that could not be extended
    pub failed_count: i64,
}

impl FromClaims for NotificationSummary {
    fn from_claims(claims: &Claims) -> Result<Self, ClaimError> {
        Ok(Self {
            request_identifier: claims.required_str("requestIdentifier")?.to_string(),
            environment: required_environment(claims)?,
            app_apple_id: claims.optional_i64("appAppleId")?,
            bundle_id: claims.required_str("bundleId")?.to_string(),
            product_id: claims.required_str("productId")?.to_string(),
            succeeded_count: claims.required_i64("succeededCount")?,
            failed_count: claims.required_i64("failedCount")?,
        })
    }
}

/// Verified App Store Server Notification (version 2)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    /// Event that triggered the notification
    pub notification_type: NotificationType,
    /// Detail of the event, if any
    pub subtype: Option<Subtype>,
    /// Unique id, stable across retries
    #[serde(rename = "notificationUUID")]
    pub notification_uuid: String,
    /// Notification format version
    pub version: Option<String>,
    /// When the App Store signed the notification
    pub signed_date: DateTime<Utc>,
    /// App metadata and signed payloads, for most notification types
    pub data: Option<NotificationData>,
    /// Extension request outcome, for `RENEWAL_EXTENSION` summaries
    pub summary: Option<NotificationSummary>,
}

impl NotificationPayload {
    /// Environment, bundle id and app Apple id the notification belongs to
    pub(crate) fn app_binding(&self) -> Option<(&Environment, &str, Option<i64>)> {
        if let Some(data) = &self.data {
            return Some((&data.environment, &data.bundle_id, data.app_apple_id));
        }
        self.summary
            .as_ref()
            .map(|s| (&s.environment, s.bundle_id.as_str(), s.app_apple_id))
    }
}

impl FromClaims for NotificationPayload {
    fn from_claims(claims: &Claims) -> Result<Self, ClaimError> {
        let data = claims
            .optional_object("data")?
            .map(|data| NotificationData::from_claims(&data))
            .transpose()?;
        let summary = claims
            .optional_object("summary")?
            .map(|summary| NotificationSummary::from_claims(&summary))
            .transpose()?;

        Ok(Self {
            notification_type: claims
                .required_str("notificationType")
                .map(NotificationType::from_raw)?,
            subtype: optional_string_enum(claims, "subtype", Subtype::from_raw)?,
            notification_uuid: claims.required_str("notificationUUID")?.to_string(),
            version: claims.optional_string("version")?,
            signed_date: claims.required_millis("signedDate")?,
            data,
            summary,
        })
    }
}

/// A notification with its nested transaction and renewal info verified
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedNotification {
    /// The notification itself
    pub notification: NotificationPayload,
    /// Verified `data.signedTransactionInfo`, when present
    pub transaction: Option<TransactionInfo>,
    /// Verified `data.signedRenewalInfo`, when present
    pub renewal_info: Option<RenewalInfo>,
}
