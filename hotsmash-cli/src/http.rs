/// HTTP client for the hotsmash backend.
///
/// Routes, relative to the configured endpoint:
///   GET  /founders                        -> [Entity]
///   POST /votes                           -> { "voteId": ... }
///   GET  /voters/{id}/votes?since=<ms>    -> { "count": ... }
use std::time::Duration;

use async_trait::async_trait;
use hotsmash_core::{Entity, GatewayError, PersistenceGateway, Timestamp, VoteId, VoteTransaction};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Configuration for the backend endpoint.
pub struct HttpConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Upper bound for a whole request, connect through body.
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyVoteResponse {
    vote_id: VoteId,
}

#[derive(Debug, Deserialize)]
struct VoteCountResponse {
    count: u64,
}

pub struct HttpGateway {
    client: Client,
    config: HttpConfig,
}

impl HttpGateway {
    pub fn new(config: HttpConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(HttpGateway { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    /// `{endpoint}/voters/{voter}/votes`, with the voter id as one encoded segment.
    fn voter_votes_url(&self, voter: &str) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&self.url("voters"))
            .map_err(|e| GatewayError::Rejected(format!("invalid endpoint {}: {e}", self.config.endpoint)))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Rejected(format!("endpoint {} cannot take a path", self.config.endpoint)))?
            .push(voter)
            .push("votes");
        Ok(url)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match self.config.api_key {
            Some(ref key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, GatewayError> {
        let resp = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("HTTP request failed: {e}")))?;

        let resp = check_status(resp).await?;
        resp.json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("Failed to parse backend response JSON: {e}")))
    }
}

/// Map a non-success status onto the gateway error taxonomy.
fn classify(status: StatusCode, body: &str) -> GatewayError {
    let snippet: String = body.chars().take(200).collect();
    let detail = format!("backend returned {status}: {snippet}");
    match status.as_u16() {
        404 => GatewayError::NotFound(detail),
        409 => GatewayError::Conflict(detail),
        400 | 403 | 422 | 429 => GatewayError::Rejected(detail),
        _ => GatewayError::Unavailable(detail),
    }
}

async fn check_status(resp: Response) -> Result<Response, GatewayError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(classify(status, &body))
}

#[async_trait]
impl PersistenceGateway for HttpGateway {
    async fn fetch_entities(&self) -> Result<Vec<Entity>, GatewayError> {
        self.send(self.client.get(self.url("founders"))).await
    }

    async fn apply_vote_transaction(&self, tx: &VoteTransaction) -> Result<VoteId, GatewayError> {
        let resp: ApplyVoteResponse = self.send(self.client.post(self.url("votes")).json(tx)).await?;
        debug!(mutation_id = %tx.mutation_id, vote_id = %resp.vote_id, "backend applied vote");
        Ok(resp.vote_id)
    }

    async fn count_votes_for_voter(&self, voter: &str, since: Timestamp) -> Result<Option<u64>, GatewayError> {
        let req = self.client.get(self.voter_votes_url(voter)?).query(&[("since", since)]);
        match self.send::<VoteCountResponse>(req).await {
            Ok(resp) => Ok(Some(resp.count)),
            // Older backends do not expose the count.
            Err(GatewayError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(classify(StatusCode::NOT_FOUND, ""), GatewayError::NotFound(_)));
        assert!(matches!(classify(StatusCode::CONFLICT, ""), GatewayError::Conflict(_)));
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::FORBIDDEN,
            StatusCode::UNPROCESSABLE_ENTITY,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            assert!(matches!(classify(status, ""), GatewayError::Rejected(_)), "{status}");
        }
        for status in [StatusCode::INTERNAL_SERVER_ERROR, StatusCode::BAD_GATEWAY, StatusCode::UNAUTHORIZED] {
            assert!(classify(status, "").is_retryable(), "{status}");
        }
    }

    #[test]
    fn test_error_body_is_truncated() {
        let body = "x".repeat(1_000);
        let GatewayError::Unavailable(detail) = classify(StatusCode::SERVICE_UNAVAILABLE, &body) else {
            panic!("expected unavailable");
        };
        assert!(detail.len() < 300);
    }

    fn gateway(endpoint: &str, timeout: Duration) -> HttpGateway {
        HttpGateway::new(HttpConfig { endpoint: endpoint.into(), api_key: None, timeout }).unwrap()
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let gw = gateway("http://host/api/", Duration::from_secs(5));
        assert_eq!(gw.url("founders"), "http://host/api/founders");
    }

    #[test]
    fn test_voter_id_is_one_path_segment() {
        let gw = gateway("http://host/api/", Duration::from_secs(5));
        let url = gw.voter_votes_url("a/b?c#d").unwrap();
        assert_eq!(url.as_str(), "http://host/api/voters/a%2Fb%3Fc%23d/votes");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let gw = gateway("not a url", Duration::from_secs(5));
        assert!(matches!(gw.voter_votes_url("v"), Err(GatewayError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_silent_backend_times_out() {
        // The kernel completes the handshake from the backlog; nothing ever answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let gw = gateway(&format!("http://{addr}/api"), Duration::from_millis(200));

        let fetched = tokio::time::timeout(Duration::from_secs(5), gw.fetch_entities())
            .await
            .expect("fetch_entities should give up on its own");
        assert!(matches!(fetched, Err(GatewayError::Unavailable(_))), "{fetched:?}");

        let counted = tokio::time::timeout(Duration::from_secs(5), gw.count_votes_for_voter("v", 0))
            .await
            .expect("count_votes_for_voter should give up on its own");
        assert!(matches!(counted, Err(GatewayError::Unavailable(_))), "{counted:?}");
        drop(listener);
    }

    #[test]
    fn test_vote_response_is_camel_case() {
        let resp: ApplyVoteResponse = serde_json::from_str(r#"{"voteId":"v-1"}"#).unwrap();
        assert_eq!(resp.vote_id, "v-1");
    }
}
