use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;

use super::DecryptionRelay;
use crate::api::*;
use crate::error::ProtocolError;

pub struct RelayClient {
    url: String,
    client: reqwest::Client,
}
impl RelayClient {
    pub fn new(url: String, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            url,
            client: builder.build()?,
        })
    }
}
#[async_trait]
impl DecryptionRelay for RelayClient {
    async fn user_decrypt(
        &self,
        request: UserDecryptRequest,
    ) -> Result<UserDecryptResponse, ProtocolError> {
        debug!(
            "Requesting user decryption of {} handles",
            request.handle_contract_pairs.len()
        );
        let response = self
            .client
            .post(self.url.clone() + "/v1/user-decrypt")
            .json(&request)
            .send()
            .await
            .map_err(|e| ProtocolError::DecryptionUnavailable(format!("relay unreachable: {}", e)))?;
        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ProtocolError::AuthorizationDenied(text)
                }
                status => ProtocolError::DecryptionUnavailable(format!("{}: {}", status, text)),
            });
        }
        response
            .json::<UserDecryptResponse>()
            .await
            .map_err(|e| ProtocolError::DecryptionUnavailable(format!("bad relay response: {}", e)))
    }
}
