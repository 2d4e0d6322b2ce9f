use std::future::Future;
use std::pin::Pin;

use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;

use crate::error::MinerError;

/// A future boxed so it can cross a trait-object boundary; used to keep
/// `ScavengerRpc` object-safe without pulling in an `async-trait` macro
/// dependency for two methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The slice of the remote service the mining loop and maintenance loop
/// drive: fetching challenges and submitting solutions. Split out as a
/// trait so `Scheduler`/`MaintenanceLoop` can be exercised against a fake
/// in tests without touching the network.
pub trait ScavengerRpc: Send + Sync {
    fn get_challenge(&self) -> BoxFuture<'_, Result<ChallengeResponse, MinerError>>;

    fn submit_solution<'a>(
        &'a self,
        address: &'a str,
        challenge_id: &'a str,
        nonce: &'a str,
    ) -> BoxFuture<'a, Result<SubmitResponse, MinerError>>;
}

const USER_AGENT: &str = concat!("scavenger_miner/", env!("CARGO_PKG_VERSION"));

/// ------------------ Terms & Conditions ------------------
#[derive(Debug, Deserialize)]
pub struct TermsResponse {
    pub version: String,
    pub content: String,
    pub message: String,
}

/// ------------------ Register ------------------
#[derive(Debug, Deserialize)]
pub struct RegistrationReceipt {
    pub preimage: String,
    pub signature: String,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterResponse {
    #[serde(rename = "registrationReceipt")]
    pub registration_receipt: RegistrationReceipt,
}

/// ------------------ Statistics ------------------
#[derive(Debug, Deserialize)]
pub struct StatisticsResponse {
    pub address: Option<String>,
    pub solved: Option<u64>,
    pub invalid: Option<u64>,
    pub pending: Option<u64>,
}

/// ------------------ Challenge ------------------
#[derive(Debug, Deserialize, Clone)]
pub struct ChallengeParams {
    pub challenge_id: String,
    pub day: u32,
    pub challenge_number: u32,
    pub latest_submission: String,
    pub difficulty: String,
    pub no_pre_mine: String,
    pub no_pre_mine_hour: String,
}

impl From<ChallengeParams> for crate::model::Challenge {
    fn from(p: ChallengeParams) -> Self {
        crate::model::Challenge {
            challenge_id: p.challenge_id,
            day: p.day as i64,
            challenge_number: p.challenge_number as i64,
            difficulty: p.difficulty,
            no_pre_mine: p.no_pre_mine,
            no_pre_mine_hour: p.no_pre_mine_hour,
            latest_submission: p.latest_submission,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChallengeResponse {
    pub code: String,
    pub challenge: Option<ChallengeParams>,
    #[serde(rename = "mining_period_ends")]
    pub mining_period_ends: Option<String>,
    #[serde(rename = "current_day")]
    pub current_day: Option<u32>,
}

/// ------------------ Solution ------------------
#[derive(Debug, Deserialize)]
pub struct CryptoReceipt {
    pub preimage: String,
    pub timestamp: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    #[serde(rename = "crypto_receipt")]
    pub crypto_receipt: Option<CryptoReceipt>,
    #[serde(rename = "statusCode")]
    pub status_code: Option<u16>,
    pub message: Option<String>,
}

/// ------------------ Donate ------------------
#[derive(Debug, Deserialize)]
pub struct DonateResponse {
    pub status: Option<String>,
    pub message: Option<String>,
    pub donation_id: Option<String>,
    pub original_address: Option<String>,
    pub destination_address: Option<String>,
    pub timestamp: Option<String>,
    pub solutions_consolidated: Option<u64>,
    pub error: Option<String>,
    #[serde(rename = "statusCode")]
    pub status_code: Option<u16>,
}

/// Thin HTTP client over the Scavenger Mine REST surface. Every method maps
/// a non-2xx response, a network error, or a body that doesn't parse as the
/// expected JSON shape into `MinerError::Rpc`.
pub struct RpcClient {
    base_url: String,
    http_client: Client,
}

impl RpcClient {
    pub fn new(base_url: &str) -> Result<Self, MinerError> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| MinerError::Rpc(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: client,
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, MinerError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http_client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| MinerError::Rpc(format!("GET {} failed: {}", url, e)))?;
        Self::parse_response(url, resp).await
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, MinerError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http_client
            .post(&url)
            .header("User-Agent", USER_AGENT)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| MinerError::Rpc(format!("POST {} failed: {}", url, e)))?;
        Self::parse_response(url, resp).await
    }

    async fn parse_response<T: for<'de> Deserialize<'de>>(
        url: String,
        resp: reqwest::Response,
    ) -> Result<T, MinerError> {
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| MinerError::Rpc(format!("reading body of {} failed: {}", url, e)))?;
        debug!("response from {}: {}", url, text);
        if !status.is_success() {
            return Err(MinerError::Rpc(format!("{} returned {}: {}", url, status, text)));
        }
        serde_json::from_str(&text)
            .map_err(|e| MinerError::Rpc(format!("parsing response from {} failed: {} / raw={}", url, e, text)))
    }

    /// GET /TandC[/{version}]
    pub async fn get_terms(&self, version: Option<&str>) -> Result<TermsResponse, MinerError> {
        match version {
            Some(v) => self.get_json(&format!("/TandC/{}", v)).await,
            None => self.get_json("/TandC").await,
        }
    }

    /// POST /register/{address}/{signature}/{pubkey}
    pub async fn register_address(
        &self,
        address: &str,
        signature: &str,
        pubkey: &str,
    ) -> Result<RegisterResponse, MinerError> {
        self.post_json(&format!("/register/{}/{}/{}", address, signature, pubkey)).await
    }

    /// GET /statistics/{address}
    pub async fn get_statistics(&self, address: &str) -> Result<StatisticsResponse, MinerError> {
        self.get_json(&format!("/statistics/{}", address)).await
    }

    /// GET /challenge
    pub async fn get_challenge(&self) -> Result<ChallengeResponse, MinerError> {
        self.get_json("/challenge").await
    }

    /// POST /solution/{address}/{challenge_id}/{nonce}
    pub async fn submit_solution(
        &self,
        address: &str,
        challenge_id: &str,
        nonce: &str,
    ) -> Result<SubmitResponse, MinerError> {
        info!("submitting solution: address={} challenge={} nonce={}", address, challenge_id, nonce);
        self.post_json(&format!("/solution/{}/{}/{}", address, challenge_id, nonce)).await
    }

    /// POST /donate_to/{destination}/{original}/{signature}
    pub async fn donate_to(
        &self,
        destination_address: &str,
        original_address: &str,
        signature: &str,
    ) -> Result<DonateResponse, MinerError> {
        self.post_json(&format!(
            "/donate_to/{}/{}/{}",
            destination_address, original_address, signature
        ))
        .await
    }
}

impl ScavengerRpc for RpcClient {
    fn get_challenge(&self) -> BoxFuture<'_, Result<ChallengeResponse, MinerError>> {
        Box::pin(async move { RpcClient::get_challenge(self).await })
    }

    fn submit_solution<'a>(
        &'a self,
        address: &'a str,
        challenge_id: &'a str,
        nonce: &'a str,
    ) -> BoxFuture<'a, Result<SubmitResponse, MinerError>> {
        Box::pin(async move { RpcClient::submit_solution(self, address, challenge_id, nonce).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;

    #[tokio::test]
    async fn get_challenge_parses_a_successful_response() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/challenge");
            then.status(200).json_body(serde_json::json!({
                "code": "OK",
                "challenge": {
                    "challenge_id": "**D21C10",
                    "day": 21,
                    "challenge_number": 10,
                    "latest_submission": "2026-07-28T23:59:59Z",
                    "difficulty": "00000000",
                    "no_pre_mine": "deadbeef",
                    "no_pre_mine_hour": "1730000000"
                }
            }));
        });

        let client = RpcClient::new(&server.base_url()).unwrap();
        let resp = client.get_challenge().await.unwrap();
        mock.assert();
        assert_eq!(resp.code, "OK");
        assert_eq!(resp.challenge.unwrap().challenge_id, "**D21C10");
    }

    #[tokio::test]
    async fn non_success_status_becomes_a_rpc_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/challenge");
            then.status(503).body("unavailable");
        });

        let client = RpcClient::new(&server.base_url()).unwrap();
        let err = client.get_challenge().await.unwrap_err();
        assert!(matches!(err, MinerError::Rpc(_)));
    }
}
