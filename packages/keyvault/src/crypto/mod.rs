//! Cryptographic primitives
//!
//! Pure functions over RSA and AES plus the bounded key generator. Nothing in this
//! module touches the entity store.

pub mod aes;
pub mod internal_key;
pub mod keygen;
pub mod random;
pub mod rsa;

pub use internal_key::InternalKeyStore;
pub use keygen::KeyGenerator;
pub use random::random_bytes;
pub use rsa::RsaKeyMaterial;
