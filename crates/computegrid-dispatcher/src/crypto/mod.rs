//! Cryptographic utilities for the identity gate.

mod password;
mod token;

pub use password::{generate_salt, hash_password, verify_password};
pub use token::{generate_secret, hash_token, Claims, TokenSigner};
