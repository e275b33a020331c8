//! # Cryypt Key Vault
//!
//! Local emulator of a cloud key vault for development and testing.
//!
//! ## Features
//!
//! - **Secrets**: versioned string values with attributes and tags
//! - **Keys**: RSA keys with encrypt, decrypt, sign, verify, wrap and unwrap
//! - **Certificates**: self-signed issuance, external merge and import, each backed by a
//!   managed key and secret of the same name
//! - **Soft delete**: deleted items stay recoverable until purged or their retention ends
//! - **Backup/restore**: full version histories sealed in envelope tokens
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cryypt_keyvault::{KeyVault, KeyVaultConfig, PropertiesPatch};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let vault = KeyVault::new(KeyVaultConfig::default()).await?;
//! vault
//!     .secrets()
//!     .set_secret("db-password", "hunter2", None, PropertiesPatch::default())
//!     .await?;
//! let current = vault.secrets().get_secret("db-password", None).await?;
//! assert_eq!(current.value, "hunter2");
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod model;
pub mod services;
pub mod store;
pub mod validation;
pub mod vault;

pub use config::KeyVaultConfig;
pub use envelope::Envelope;
pub use error::{EntityKind, ErrorKind, VaultError, VaultResult};
pub use model::{
    CertificateBundle, CertificateOperation, CertificatePolicy, KeyBundle, KeyOperation,
    PropertiesPatch, SecretBundle, Version,
};
pub use services::keys::{CreateKeyOptions, ImportKeyOptions, KeyOperationResult, KeyUpdate};
pub use services::{CertificateService, KeyService, SecretService};
pub use store::{EntityStore, MemoryStore, Page, PageRequest};
pub use vault::KeyVault;
