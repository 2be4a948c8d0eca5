//! Credential verification
//!
//! Each pipeline's credential is checked once at startup. A credential that
//! fails verification aborts startup for the whole process.

use crate::error::{BridgeError, CredentialError, Result};
use crate::models::{Credential, Identity};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Resolves a credential to the identity it acts as
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(
        &self,
        credential: &Credential,
    ) -> std::result::Result<Identity, CredentialError>;
}

/// Verifies tokens against the people API (`GET {base}/people/me`)
#[derive(Clone)]
pub struct PeopleApiVerifier {
    client: Client,
    base_url: String,
}

impl PeopleApiVerifier {
    pub fn new(base_url: &str, timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| BridgeError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn me_url(&self) -> String {
        format!("{}/people/me", self.base_url)
    }
}

#[async_trait]
impl IdentityVerifier for PeopleApiVerifier {
    async fn verify(
        &self,
        credential: &Credential,
    ) -> std::result::Result<Identity, CredentialError> {
        let url = self.me_url();
        debug!("Verifying credential against {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.expose())
            .send()
            .await
            .map_err(|e| CredentialError::Unreachable {
                pipeline: String::new(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::Rejected {
                pipeline: String::new(),
                status: status.as_u16(),
            });
        }

        response
            .json::<Identity>()
            .await
            .map_err(|e| CredentialError::InvalidResponse {
                pipeline: String::new(),
                message: e.to_string(),
            })
    }
}
