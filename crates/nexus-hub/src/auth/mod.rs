//! Authentication for the hub
//!
//! One administrative principal (PBKDF2-SHA512 password record), signed
//! bearer tokens for clients, and the shared worker credential check for
//! agents.

pub mod credentials;
pub mod password;
pub mod token;

pub use credentials::{CredentialError, CredentialStore};
pub use password::{hash_password, verify_password, PasswordRecord};
pub use token::{Claims, TokenSigner};
