// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outbound HTTP transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::debug;

use crate::error::{AnalyticsError, TransportError};

/// Content type sent with every request.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

/// Default HTTP request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
	pub status: u16,
	pub body: String,
}

/// Sends form-encoded POST requests.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Posts `fields` as an `application/x-www-form-urlencoded` body.
	///
	/// Non-success statuses are returned as errors.
	async fn post_form(
		&self,
		url: &str,
		fields: Vec<(String, String)>,
	) -> Result<TransportResponse, TransportError>;
}

/// Encodes fields as a urlencoded form body.
pub fn encode_form(fields: &[(String, String)]) -> String {
	url::form_urlencoded::Serializer::new(String::new())
		.extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
		.finish()
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
	client: reqwest::Client,
}

impl HttpTransport {
	pub fn new(timeout: Duration) -> Result<Self, AnalyticsError> {
		let client = tally_common_http::builder().timeout(timeout).build()?;
		Ok(Self { client })
	}

	/// Like [`new`](Self::new) but reports the host application's User-Agent.
	pub fn with_user_agent(timeout: Duration, user_agent: impl Into<String>) -> Result<Self, AnalyticsError> {
		let client = tally_common_http::builder_with_user_agent(user_agent)
			.timeout(timeout)
			.build()?;
		Ok(Self { client })
	}

	pub fn with_client(client: reqwest::Client) -> Self {
		Self { client }
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn post_form(
		&self,
		url: &str,
		fields: Vec<(String, String)>,
	) -> Result<TransportResponse, TransportError> {
		let body = encode_form(&fields);
		debug!(url = %url, bytes = body.len(), "Posting form");

		let response = self
			.client
			.post(url)
			.header(CONTENT_TYPE, FORM_CONTENT_TYPE)
			.body(body)
			.send()
			.await?;

		let status = response.status();

		if status == StatusCode::TOO_MANY_REQUESTS {
			let retry_after = response
				.headers()
				.get(RETRY_AFTER)
				.and_then(|v| v.to_str().ok())
				.and_then(|s| s.trim().parse().ok());
			return Err(TransportError::RateLimited {
				retry_after_secs: retry_after,
			});
		}

		if !status.is_success() {
			let message = response.text().await.unwrap_or_default();
			return Err(TransportError::ServerError {
				status: status.as_u16(),
				message,
			});
		}

		let body = response.text().await?;
		Ok(TransportResponse {
			status: status.as_u16(),
			body,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::matchers::{body_string, header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
		pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect()
	}

	#[test]
	fn form_encoding_escapes_json() {
		let body = encode_form(&fields(&[("api_key", "k"), ("event", r#"[{"a":1}]"#)]));
		assert_eq!(body, "api_key=k&event=%5B%7B%22a%22%3A1%7D%5D");
	}

	#[tokio::test]
	async fn posts_form_with_content_type() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/httpapi"))
			.and(header("content-type", FORM_CONTENT_TYPE))
			.and(body_string("api_key=k&event=%5B%5D"))
			.respond_with(ResponseTemplate::new(200).set_body_string("success"))
			.expect(1)
			.mount(&server)
			.await;

		let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
		let response = transport
			.post_form(
				&format!("{}/httpapi", server.uri()),
				fields(&[("api_key", "k"), ("event", "[]")]),
			)
			.await
			.unwrap();

		assert_eq!(response.status, 200);
		assert_eq!(response.body, "success");
	}

	#[tokio::test]
	async fn custom_user_agent_is_sent() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(header("user-agent", "myapp/2.0"))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;

		let transport = HttpTransport::with_user_agent(Duration::from_secs(5), "myapp/2.0").unwrap();
		transport.post_form(&server.uri(), fields(&[])).await.unwrap();
	}

	#[tokio::test]
	async fn server_errors_are_reported() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(500).set_body_string("internal"))
			.mount(&server)
			.await;

		let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
		let err = transport
			.post_form(&server.uri(), fields(&[("api_key", "k")]))
			.await
			.unwrap_err();

		match err {
			TransportError::ServerError { status, message } => {
				assert_eq!(status, 500);
				assert_eq!(message, "internal");
			}
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[tokio::test]
	async fn rate_limit_reads_retry_after() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
			.mount(&server)
			.await;

		let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
		let err = transport
			.post_form(&server.uri(), fields(&[]))
			.await
			.unwrap_err();

		assert!(matches!(
			err,
			TransportError::RateLimited {
				retry_after_secs: Some(12)
			}
		));
	}

	#[tokio::test]
	async fn connection_failure_is_request_failed() {
		let transport = HttpTransport::new(Duration::from_secs(1)).unwrap();
		let err = transport
			.post_form("http://127.0.0.1:1/httpapi", fields(&[]))
			.await
			.unwrap_err();
		assert!(matches!(err, TransportError::RequestFailed(_)));
	}
}
