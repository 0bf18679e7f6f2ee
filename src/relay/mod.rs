//! Key-exchange relay client (spec §4.7, §6).
//!
//! The relay encapsulates Play Integrity token acquisition and the upstream
//! `EncryptKey` call; this module only speaks its narrow HTTP contract
//! (`POST {base}/key-exchange`). The spec also documents an equivalent gRPC
//! form (hand-encoded protobuf against `connect.ml.pr.sec01.proregia.io`) —
//! we implement only the HTTP form here; see DESIGN.md.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PumpError, PumpResult};

/// Overall relay call budget (spec §5): 120 s connect + 120 s read.
const RELAY_TIMEOUT: Duration = Duration::from_secs(240);

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
struct KeyExchangeRequest {
    challenge: String,
    pump_public_key: String,
    app_public_key: String,
    bt_address: String,
    device_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct KeyExchangeResponse {
    encrypted_bytes: String,
    #[allow(dead_code)] // opaque to the core, per spec §4.7 step 5.
    server_nonce: String,
}

/// The key material and metadata needed to complete one renewal round.
pub struct KeyExchangeInput<'a> {
    pub challenge: &'a [u8],
    pub pump_public_key: &'a [u8; 32],
    pub app_public_key: &'a [u8; 32],
    pub bt_address: &'a [u8; 6],
    pub device_id: &'a str,
}

/// The relay's response: the encrypted payload to write to the pump's
/// key-write characteristic.
pub struct KeyExchangeOutput {
    pub encrypted_bytes: Vec<u8>,
}

/// Seam for the relay call, so the controller (C7) can be tested against a
/// mock without an HTTP round-trip.
#[async_trait]
pub trait KeyExchangeRelay: Send + Sync {
    async fn exchange_key(&self, input: KeyExchangeInput<'_>) -> PumpResult<KeyExchangeOutput>;
}

/// HTTP implementation of [`KeyExchangeRelay`], grounded on the ecosystem's
/// existing `reqwest` JSON-call pattern.
pub struct HttpRelay {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRelay {
    pub fn new(base_url: impl Into<String>) -> PumpResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(RELAY_TIMEOUT)
            .build()
            .map_err(|e| PumpError::RelayFailure(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

#[async_trait]
impl KeyExchangeRelay for HttpRelay {
    async fn exchange_key(&self, input: KeyExchangeInput<'_>) -> PumpResult<KeyExchangeOutput> {
        let url = format!("{}/key-exchange", self.base_url);
        let body = KeyExchangeRequest {
            challenge: hex::encode(input.challenge),
            pump_public_key: hex::encode(input.pump_public_key),
            app_public_key: hex::encode(input.app_public_key),
            bt_address: hex::encode(input.bt_address),
            device_id: input.device_id.to_string(),
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PumpError::RelayFailure(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(PumpError::RelayFailure(format!(
                "relay returned {status}: {text}"
            )));
        }

        let parsed: KeyExchangeResponse = resp
            .json()
            .await
            .map_err(|e| PumpError::RelayFailure(format!("malformed relay response: {e}")))?;

        let encrypted_bytes = hex::decode(&parsed.encrypted_bytes)
            .map_err(|e| PumpError::RelayFailure(format!("non-hex encrypted_bytes: {e}")))?;

        Ok(KeyExchangeOutput { encrypted_bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_timeout_matches_spec_budget() {
        assert_eq!(RELAY_TIMEOUT, Duration::from_secs(240));
    }
}
