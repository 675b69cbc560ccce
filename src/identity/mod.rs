//! Microsoft Entra ID authentication.
//!
//! Provides:
//! - `ClientSecretCredential`: client-credentials token exchange
//! - `AzureIdentity`: credential wiring for the Cognitive Services scope
//! - `TokenProvider`: the callable token supplier handed to clients

mod credential;
mod provider;

pub use credential::*;
pub use provider::*;
