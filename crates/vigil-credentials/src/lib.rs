//! Credential resolution for vigil
//!
//! Turns a Cluster's declared access method into credentials the
//! controllers can connect with:
//!
//! - **Local**: the controller's own service account
//! - **Direct reference**: a kubeconfig stored in a Secret
//! - **Cloud (EKS)**: a kubeconfig minted from long-lived AWS credentials,
//!   persisted as a Secret owned by the Cluster and refreshed before the
//!   embedded token expires

#![deny(missing_docs)]

pub mod eks;
mod error;
pub mod kubeconfig;
mod resolver;
pub mod secrets;
pub mod sigv4;

pub use error::CredentialError;
pub use resolver::{
    kubeconfig_secret_ref, minted_secret_name, CredentialResolver, Credentials, Resolution,
};
