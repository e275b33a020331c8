//! Error surface for vault operations
//!
//! Every failure carries a machine-readable [`ErrorKind`]. Errors raised by the crypto
//! primitives and the envelope codec keep their kind when a service attaches item
//! context through [`ResultExt::for_item`].

use crate::model::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three item kinds a vault stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Secret values
    Secret,
    /// RSA keys
    Key,
    /// X.509 certificates
    Certificate,
}

impl EntityKind {
    /// Collection segment used in item identifiers
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Secret => "secrets",
            EntityKind::Key => "keys",
            EntityKind::Certificate => "certificates",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Secret => f.write_str("secret"),
            EntityKind::Key => f.write_str("key"),
            EntityKind::Certificate => f.write_str("certificate"),
        }
    }
}

/// Machine-readable failure category exposed to the API layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown name or version, or purged
    NotFound,
    /// Create/restore against a deleted name, or divergent certificate state
    Conflict,
    /// Malformed input, unsupported key size/type, oversized payload
    Validation,
    /// Verb not allowed, or key disabled/expired
    OperationNotPermitted,
    /// Malformed envelope token
    Format,
    /// Envelope payload shape mismatch
    Deserialization,
    /// Encryption primitive failure
    Encryption,
    /// Signature primitive failure
    Signature,
    /// Broken invariant or I/O failure
    Internal,
}

/// Identifies the item an error refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    /// Item kind
    pub entity: EntityKind,
    /// Item name
    pub name: String,
    /// Item version, when one was addressed
    pub version: Option<Version>,
}

impl ItemRef {
    /// Reference a name, optionally at a version
    pub fn new(entity: EntityKind, name: impl Into<String>, version: Option<Version>) -> Self {
        Self {
            entity,
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} '{}' (version {})", self.entity, self.name, version),
            None => write!(f, "{} '{}'", self.entity, self.name),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("{target} not found")]
    NotFound { target: ItemRef },
    #[error("Conflict on {target}: {reason}")]
    Conflict { target: ItemRef, reason: String },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Operation not permitted on {target}: {reason}")]
    OperationNotPermitted { target: ItemRef, reason: String },
    #[error("Format error: {0}")]
    Format(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Encryption error: {0}")]
    Encryption(String),
    #[error("Signature error: {0}")]
    Signature(String),
    #[error("{target}: {source}")]
    Item {
        target: ItemRef,
        #[source]
        source: Box<VaultError>,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Create a not-found error for a name or version
    pub fn not_found(entity: EntityKind, name: &str, version: Option<&Version>) -> Self {
        VaultError::NotFound {
            target: ItemRef::new(entity, name, version.cloned()),
        }
    }

    /// Create a conflict error
    pub fn conflict(entity: EntityKind, name: &str, reason: impl Into<String>) -> Self {
        VaultError::Conflict {
            target: ItemRef::new(entity, name, None),
            reason: reason.into(),
        }
    }

    /// Create an operation-not-permitted error
    pub fn not_permitted(
        entity: EntityKind,
        name: &str,
        version: Option<&Version>,
        reason: impl Into<String>,
    ) -> Self {
        VaultError::OperationNotPermitted {
            target: ItemRef::new(entity, name, version.cloned()),
            reason: reason.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        VaultError::Validation(msg.into())
    }

    /// Machine-readable category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::NotFound { .. } => ErrorKind::NotFound,
            VaultError::Conflict { .. } => ErrorKind::Conflict,
            VaultError::Validation(_) => ErrorKind::Validation,
            VaultError::OperationNotPermitted { .. } => ErrorKind::OperationNotPermitted,
            VaultError::Format(_) => ErrorKind::Format,
            VaultError::Deserialization(_) => ErrorKind::Deserialization,
            VaultError::Encryption(_) => ErrorKind::Encryption,
            VaultError::Signature(_) => ErrorKind::Signature,
            VaultError::Item { source, .. } => source.kind(),
            VaultError::Io(_) | VaultError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The item this error refers to, if any
    pub fn target(&self) -> Option<&ItemRef> {
        match self {
            VaultError::NotFound { target }
            | VaultError::Conflict { target, .. }
            | VaultError::OperationNotPermitted { target, .. }
            | VaultError::Item { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Attach item context unless the error already names its item
    pub fn for_item(self, entity: EntityKind, name: &str, version: Option<&Version>) -> Self {
        if self.target().is_some() {
            return self;
        }
        VaultError::Item {
            target: ItemRef::new(entity, name, version.cloned()),
            source: Box::new(self),
        }
    }
}

pub type VaultResult<T> = Result<T, VaultError>;

/// Item-context helper for results
pub trait ResultExt<T> {
    /// See [`VaultError::for_item`]
    fn for_item(self, entity: EntityKind, name: &str, version: Option<&Version>)
        -> VaultResult<T>;
}

impl<T> ResultExt<T> for VaultResult<T> {
    fn for_item(
        self,
        entity: EntityKind,
        name: &str,
        version: Option<&Version>,
    ) -> VaultResult<T> {
        self.map_err(|e| e.for_item(entity, name, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_the_primitive_kind() {
        let err = VaultError::Signature("bad digest".to_string()).for_item(
            EntityKind::Key,
            "k1",
            Some(&Version::new(1)),
        );
        assert_eq!(err.kind(), ErrorKind::Signature);
        let target = err.target().map(|t| t.name.clone());
        assert_eq!(target.as_deref(), Some("k1"));
        assert!(err.to_string().contains("bad digest"));
    }

    #[test]
    fn context_is_not_stacked() {
        let err = VaultError::not_found(EntityKind::Secret, "s1", None).for_item(
            EntityKind::Key,
            "other",
            None,
        );
        assert!(matches!(err, VaultError::NotFound { .. }));
        assert_eq!(err.to_string(), "secret 's1' not found");
    }
}
