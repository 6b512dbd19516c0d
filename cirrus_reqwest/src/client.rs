//! A typed JSON client for resource APIs

use std::time::Duration;

use bytes::Bytes;
use cirrus_tokens::backoff::{RetryError, RetryPolicy};
use reqwest::{header, Method};
use reqwest_middleware::ClientWithMiddleware;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Direction, RequestError, ValidationError};

/// A request or response shape exchanged with a resource API
pub trait Schema: Serialize + DeserializeOwned {
    /// Checks constraints that serde alone cannot express
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

impl Schema for serde_json::Value {}

/// Issues JSON requests against a single API root
///
/// Authorization is left to the middleware stack of the wrapped client,
/// usually an [`AccessTokenMiddleware`](crate::AccessTokenMiddleware).
#[derive(Clone, Debug)]
pub struct ResourceClient {
    client: ClientWithMiddleware,
    api_root: String,
    retry: Option<RetryPolicy>,
}

impl ResourceClient {
    /// Constructs a client for the API rooted at `api_root`
    pub fn new(client: ClientWithMiddleware, api_root: impl Into<String>) -> Self {
        let mut api_root = api_root.into();
        while api_root.ends_with('/') {
            api_root.pop();
        }

        Self {
            client,
            api_root,
            retry: None,
        }
    }

    /// Retries transient failures according to `policy`
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// The API root
    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    /// Builds the URL for `path` beneath the API root
    ///
    /// `prettyPrint=false` is always appended so the service skips
    /// formatting its responses.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        let separator = if path.contains('?') { '&' } else { '?' };
        format!("{}/{path}{separator}prettyPrint=false", self.api_root)
    }

    /// Fetches and decodes a resource
    pub async fn get_json<T: Schema>(
        &self,
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<T, RequestError> {
        self.dispatch(Method::GET, url, None, timeout).await
    }

    /// Sends `body` with the given method and decodes the response
    ///
    /// The body is validated before anything is sent.
    pub async fn send_json<B: Schema, T: Schema>(
        &self,
        method: Method,
        url: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<T, RequestError> {
        body.validate().map_err(|e| (Direction::Request, e))?;
        let payload = Bytes::from(serde_json::to_vec(body).map_err(RequestError::Encode)?);

        self.dispatch(method, url, Some(payload), timeout).await
    }

    async fn dispatch<T: Schema>(
        &self,
        method: Method,
        url: &str,
        payload: Option<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<T, RequestError> {
        let Some(policy) = &self.retry else {
            return self.execute(&method, url, payload.as_ref(), timeout).await;
        };

        policy
            .retry(|| self.execute(&method, url, payload.as_ref(), timeout))
            .await
            .map_err(|e| match e {
                RetryError::Fatal(e) | RetryError::Exhausted { last: e, .. } => e,
            })
    }

    #[tracing::instrument(
        level = "debug",
        err,
        skip(self, payload, timeout),
        fields(http.method = %method),
    )]
    async fn execute<T: Schema>(
        &self,
        method: &Method,
        url: &str,
        payload: Option<&Bytes>,
        timeout: Option<Duration>,
    ) -> Result<T, RequestError> {
        let mut request = self.client.request(method.clone(), url);
        if let Some(payload) = payload {
            request = request
                .header(header::CONTENT_TYPE, "application/json")
                .body(payload.clone());
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let resp = request.send().await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(reqwest_middleware::Error::from)?;

        tracing::trace!(response.status = status, response.len = body.len(), "received response");

        if !(200..300).contains(&status) {
            return Err(RequestError::from_failed_response(status, &body));
        }

        let value: T = serde_json::from_slice(&body).map_err(RequestError::Decode)?;
        value.validate().map_err(|e| (Direction::Response, e))?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use cirrus_tokens::{
        backoff::{ErrorBackoffConfig, Transient},
        sources::ConstTokenSource,
        TokenCache, TokenError,
    };
    use predicates::prelude::*;
    use reqwest_middleware::ClientBuilder;
    use serde::Deserialize;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::AccessTokenMiddleware;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Dataset {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        friendly_name: Option<String>,
    }

    impl Schema for Dataset {
        fn validate(&self) -> Result<(), ValidationError> {
            if self.id.is_empty() {
                return Err(ValidationError::new("id must not be empty"));
            }
            Ok(())
        }
    }

    fn client_with_cache(server: &MockServer, cache: TokenCache<ConstTokenSource>) -> ResourceClient {
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(AccessTokenMiddleware::new(cache).with_predicate(predicate::always()))
            .build();

        ResourceClient::new(client, format!("{}/bigquery/v2/", server.uri()))
    }

    fn client(server: &MockServer) -> ResourceClient {
        client_with_cache(server, TokenCache::new(ConstTokenSource::new("resource-token")))
    }

    fn fast_retries(max_retries: u32) -> RetryPolicy {
        let delay = Duration::from_millis(1);
        RetryPolicy::new(ErrorBackoffConfig::new(delay, delay, 1), max_retries)
    }

    #[tokio::test]
    async fn urls_are_joined_and_never_pretty_printed() {
        let server = MockServer::start().await;
        let client = client(&server);

        assert_eq!(
            client.url("/projects/p/datasets"),
            format!("{}/bigquery/v2/projects/p/datasets?prettyPrint=false", server.uri())
        );
        assert_eq!(
            client.url("projects/p/datasets?all=true"),
            format!(
                "{}/bigquery/v2/projects/p/datasets?all=true&prettyPrint=false",
                server.uri()
            )
        );
    }

    #[tokio::test]
    async fn get_attaches_the_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bigquery/v2/projects/p/datasets/d"))
            .and(query_param("prettyPrint", "false"))
            .and(header("authorization", "Bearer resource-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p:d" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let dataset: Dataset = client
            .get_json(&client.url("projects/p/datasets/d"), None)
            .await
            .unwrap();

        assert_eq!(dataset.id, "p:d");
        assert_eq!(dataset.friendly_name, None);
    }

    #[tokio::test]
    async fn send_posts_a_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/bigquery/v2/projects/p/datasets/d"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({ "id": "p:d", "friendlyName": "Dee" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": "p:d", "friendlyName": "Dee" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let request = Dataset {
            id: "p:d".into(),
            friendly_name: Some("Dee".into()),
        };
        let response: Dataset = client
            .send_json(
                Method::PATCH,
                &client.url("projects/p/datasets/d"),
                &request,
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        assert_eq!(response, request);
    }

    #[tokio::test]
    async fn invalid_request_bodies_are_never_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client(&server);
        let request = Dataset {
            id: String::new(),
            friendly_name: None,
        };
        let err = client
            .send_json::<_, Dataset>(Method::POST, &client.url("projects/p/datasets"), &request, None)
            .await
            .unwrap_err();

        assert!(
            matches!(err, RequestError::Validation { direction: Direction::Request, .. }),
            "{err:?}"
        );
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct KeyedByPair {
        entries: BTreeMap<(u8, u8), String>,
    }

    impl Schema for KeyedByPair {}

    #[tokio::test]
    async fn unencodable_request_bodies_are_encode_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client(&server);
        let request = KeyedByPair {
            entries: BTreeMap::from([((1, 2), "one-two".to_owned())]),
        };
        let err = client
            .send_json::<_, serde_json::Value>(Method::POST, &client.url("pairs"), &request, None)
            .await
            .unwrap_err();

        assert!(matches!(err, RequestError::Encode(_)), "{err:?}");
    }

    #[tokio::test]
    async fn invalid_responses_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "" })))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client
            .get_json::<Dataset>(&client.url("projects/p/datasets/d"), None)
            .await
            .unwrap_err();

        assert!(
            matches!(err, RequestError::Validation { direction: Direction::Response, .. }),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn undecodable_responses_are_decode_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client
            .get_json::<serde_json::Value>(&client.url("projects/p"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, RequestError::Decode(_)), "{err:?}");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn service_unavailable_is_reported_with_a_synthetic_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream connect error"))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client
            .get_json::<Dataset>(&client.url("projects/p/datasets/d"), None)
            .await
            .unwrap_err();

        match &err {
            RequestError::ServiceUnavailable { status, error } => {
                assert_eq!(*status, 503);
                assert_eq!(error.status.as_deref(), Some("UNAVAILABLE"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn api_errors_carry_the_service_details() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {
                    "code": 404,
                    "message": "Not found: Dataset p:d",
                    "errors": [{ "reason": "notFound", "message": "Not found: Dataset p:d" }],
                    "status": "NOT_FOUND"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server).with_retry_policy(fast_retries(3));
        let err = client
            .get_json::<Dataset>(&client.url("projects/p/datasets/d"), None)
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(404));
        let error = err.error_response().unwrap();
        assert_eq!(error.message.as_deref(), Some("Not found: Dataset p:d"));
        assert_eq!(error.errors[0].reason, "notFound");
    }

    #[tokio::test]
    async fn transient_failures_are_retried_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .with_priority(1)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p:d" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server).with_retry_policy(fast_retries(2));
        let dataset: Dataset = client
            .get_json(&client.url("projects/p/datasets/d"), None)
            .await
            .unwrap();

        assert_eq!(dataset.id, "p:d");
    }

    #[tokio::test]
    async fn retries_give_up_with_the_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = client(&server).with_retry_policy(fast_retries(2));
        let err = client
            .get_json::<Dataset>(&client.url("projects/p/datasets/d"), None)
            .await
            .unwrap_err();

        assert_eq!(err.error_response().unwrap().status.as_deref(), Some("INTERNAL"));
    }

    #[tokio::test]
    async fn token_failures_surface_as_transport_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let cache = TokenCache::new(ConstTokenSource::new("resource-token"));
        cache.close().await;

        let client = client_with_cache(&server, cache).with_retry_policy(fast_retries(2));
        let err = client
            .get_json::<Dataset>(&client.url("projects/p/datasets/d"), None)
            .await
            .unwrap_err();

        assert!(!err.is_transient());
        match err {
            RequestError::Transport(reqwest_middleware::Error::Middleware(e)) => {
                assert!(matches!(e.downcast_ref::<TokenError>(), Some(TokenError::Closed)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
