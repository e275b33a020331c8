//! Certificate bundles, policies and pending issuance operations

use super::item::{Item, ItemProperties, Version};
use super::secret::{CONTENT_TYPE_PEM, CONTENT_TYPE_PKCS12};
use super::serde_b64;
use crate::error::{EntityKind, VaultError, VaultResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issuer name that makes the vault sign the certificate itself
pub const ISSUER_SELF: &str = "Self";

/// Issuer name that leaves issuance to an external CA and a later merge
pub const ISSUER_UNKNOWN: &str = "Unknown";

/// Name and version of a certificate's backing key or secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackingRef {
    pub name: String,
    pub version: Version,
}

/// One version of a certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateBundle {
    #[serde(flatten)]
    pub properties: ItemProperties,
    /// DER encoded leaf certificate
    #[serde(with = "serde_b64")]
    pub cer: Vec<u8>,
    /// Base64url SHA-1 thumbprint of `cer`
    pub x5t: String,
    pub policy: CertificatePolicy,
    pub key_ref: BackingRef,
    pub secret_ref: BackingRef,
}

impl Item for CertificateBundle {
    const KIND: EntityKind = EntityKind::Certificate;

    fn properties(&self) -> &ItemProperties {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut ItemProperties {
        &mut self.properties
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyUsage {
    #[serde(rename = "digitalSignature")]
    DigitalSignature,
    #[serde(rename = "nonRepudiation")]
    NonRepudiation,
    #[serde(rename = "keyEncipherment")]
    KeyEncipherment,
    #[serde(rename = "dataEncipherment")]
    DataEncipherment,
    #[serde(rename = "keyAgreement")]
    KeyAgreement,
    #[serde(rename = "keyCertSign")]
    KeyCertSign,
    #[serde(rename = "cRLSign")]
    CrlSign,
    #[serde(rename = "encipherOnly")]
    EncipherOnly,
    #[serde(rename = "decipherOnly")]
    DecipherOnly,
}

impl KeyUsage {
    /// Usages applied when a policy names none
    pub fn defaults() -> Vec<KeyUsage> {
        vec![
            KeyUsage::DataEncipherment,
            KeyUsage::KeyEncipherment,
            KeyUsage::DigitalSignature,
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAlternativeNames {
    #[serde(default)]
    pub dns_names: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub upns: Vec<String>,
}

impl SubjectAlternativeNames {
    pub fn is_empty(&self) -> bool {
        self.dns_names.is_empty() && self.emails.is_empty() && self.upns.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateKeyProperties {
    /// `RSA` or `RSA-HSM`; defaults to `RSA`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_size: Option<u32>,
    #[serde(default)]
    pub exportable: bool,
    #[serde(default)]
    pub reuse_key: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSecretProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Encoding of the backing secret value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretEncoding {
    /// Base64 PKCS#12 archive
    Pkcs12,
    /// Concatenated PEM blocks
    Pem,
}

impl SecretEncoding {
    pub fn content_type(self) -> &'static str {
        match self {
            SecretEncoding::Pkcs12 => CONTENT_TYPE_PKCS12,
            SecretEncoding::Pem => CONTENT_TYPE_PEM,
        }
    }
}

impl CertificateSecretProperties {
    /// Unset or `unknown` content types fall back to PKCS#12
    pub fn encoding(&self) -> VaultResult<SecretEncoding> {
        match self.content_type.as_deref() {
            None | Some("unknown") | Some(CONTENT_TYPE_PKCS12) => Ok(SecretEncoding::Pkcs12),
            Some(CONTENT_TYPE_PEM) => Ok(SecretEncoding::Pem),
            Some(other) => Err(VaultError::Validation(format!(
                "Unsupported certificate content type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509Properties {
    /// Ignored on issuance; the subject is always `CN={name}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub subject_alternative_names: SubjectAlternativeNames,
    #[serde(default)]
    pub key_usage: Vec<KeyUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_in_months: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerParameters {
    pub name: String,
}

impl Default for IssuerParameters {
    fn default() -> Self {
        Self {
            name: ISSUER_SELF.to_string(),
        }
    }
}

impl IssuerParameters {
    /// Issuance waits for an externally signed certificate
    pub fn is_external(&self) -> bool {
        self.name.eq_ignore_ascii_case(ISSUER_UNKNOWN)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime_percentage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_before_expiry: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateActionType {
    AutoRenew,
    EmailContacts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateLifetimeAction {
    pub trigger: CertificateTrigger,
    pub action: CertificateActionType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

/// How a certificate and its backing key/secret are produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificatePolicy {
    /// `{vault_url}/certificates/{name}/policy`, stamped by the vault
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub key_props: CertificateKeyProperties,
    #[serde(default)]
    pub secret_props: CertificateSecretProperties,
    #[serde(default)]
    pub x509_props: X509Properties,
    #[serde(default)]
    pub issuer: IssuerParameters,
    #[serde(default)]
    pub lifetime_actions: Vec<CertificateLifetimeAction>,
    #[serde(default)]
    pub attributes: PolicyAttributes,
}

impl CertificatePolicy {
    /// Self-signed policy with DNS subject alternative names
    pub fn with_dns_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut policy = Self::default();
        policy.x509_props.subject_alternative_names.dns_names =
            names.into_iter().map(Into::into).collect();
        policy
    }

    /// Key usages to stamp on issued certificates
    pub fn key_usages(&self) -> Vec<KeyUsage> {
        if self.x509_props.key_usage.is_empty() {
            KeyUsage::defaults()
        } else {
            self.x509_props.key_usage.clone()
        }
    }

    pub fn validate(&self) -> VaultResult<()> {
        for action in &self.lifetime_actions {
            let trigger = &action.trigger;
            if trigger.lifetime_percentage.is_some() == trigger.days_before_expiry.is_some() {
                return Err(VaultError::validation(
                    "Certificate lifetime action must set exactly one of lifetimePercentage or daysBeforeExpiry",
                ));
            }
            if matches!(trigger.lifetime_percentage, Some(p) if p == 0 || p >= 100) {
                return Err(VaultError::validation(
                    "lifetimePercentage must be between 1 and 99",
                ));
            }
        }
        if self.x509_props.validity_in_months == Some(0) {
            return Err(VaultError::validation("validityInMonths must be at least 1"));
        }
        self.secret_props.encoding()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationStatus {
    InProgress,
    Completed,
    Cancelled,
}

/// Issuance state of a certificate name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateOperation {
    /// `{vault_url}/certificates/{name}/pending`
    pub id: String,
    pub name: String,
    pub issuer: IssuerParameters,
    /// DER certificate signing request for external issuers
    #[serde(default, with = "serde_b64::option", skip_serializing_if = "Option::is_none")]
    pub csr: Option<Vec<u8>>,
    #[serde(default)]
    pub cancellation_requested: bool,
    pub status: OperationStatus,
    /// Identifier of the issued certificate version once completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub request_id: Uuid,
}

impl CertificateOperation {
    pub fn is_pending(&self) -> bool {
        self.status == OperationStatus::InProgress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_resolution() {
        let mut props = CertificateSecretProperties::default();
        assert_eq!(props.encoding().ok(), Some(SecretEncoding::Pkcs12));
        props.content_type = Some("unknown".to_string());
        assert_eq!(props.encoding().ok(), Some(SecretEncoding::Pkcs12));
        props.content_type = Some(CONTENT_TYPE_PEM.to_string());
        assert_eq!(props.encoding().ok(), Some(SecretEncoding::Pem));
        props.content_type = Some("text/plain".to_string());
        assert!(props.encoding().is_err());
    }

    #[test]
    fn policy_defaults() {
        let policy: CertificatePolicy = serde_json::from_str("{}").expect("empty policy parses");
        assert_eq!(policy.issuer.name, ISSUER_SELF);
        assert_eq!(policy.key_usages(), KeyUsage::defaults());
        assert!(policy.validate().is_ok());

        let json = serde_json::to_string(&KeyUsage::CrlSign).expect("serialize");
        assert_eq!(json, "\"cRLSign\"");
    }

    #[test]
    fn lifetime_action_needs_one_trigger() {
        let mut policy = CertificatePolicy::with_dns_names(["a.example.com"]);
        policy.lifetime_actions.push(CertificateLifetimeAction {
            trigger: CertificateTrigger::default(),
            action: CertificateActionType::AutoRenew,
        });
        assert!(policy.validate().is_err());

        policy.lifetime_actions[0].trigger.days_before_expiry = Some(30);
        assert!(policy.validate().is_ok());
    }
}
