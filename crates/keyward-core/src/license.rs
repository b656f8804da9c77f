use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::{DistributionEndpoint, License};

const JSON_API: &str = "application/vnd.api+json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseValidation {
    Valid,
    Invalid { detail: Option<String> },
}

impl LicenseValidation {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("failed to build license client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("invalid licensing endpoint {url}: {details}")]
    InvalidEndpoint { url: String, details: String },
    #[error("failed to encode validation request: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to reach licensing service: {0}")]
    Request(#[source] reqwest::Error),
    #[error("licensing service returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("failed to parse validation response: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Serialize)]
struct ValidationRequest<'a> {
    meta: RequestMeta<'a>,
}

#[derive(Serialize)]
struct RequestMeta<'a> {
    key: &'a str,
    scope: RequestScope<'a>,
}

#[derive(Serialize)]
struct RequestScope<'a> {
    product: &'a str,
}

#[derive(Deserialize)]
struct ValidationResponse {
    meta: ResponseMeta,
}

#[derive(Deserialize)]
struct ResponseMeta {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    detail: Option<String>,
}

/// `{api}/v1/accounts/{account}/licenses/actions/validate-key`
///
/// # Errors
/// Returns an error when the configured API base URL cannot be parsed or
/// cannot carry a path.
pub fn validate_url(endpoint: &DistributionEndpoint) -> Result<reqwest::Url, LicenseError> {
    let base = &endpoint.api_base_url;
    let invalid = |details: String| LicenseError::InvalidEndpoint {
        url: base.clone(),
        details,
    };

    let mut url = reqwest::Url::parse(base).map_err(|error| invalid(error.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("URL cannot be a base".to_string()))?
        .pop_if_empty()
        .extend([
            "v1",
            "accounts",
            endpoint.account.as_str(),
            "licenses",
            "actions",
            "validate-key",
        ]);
    Ok(url)
}

#[derive(Debug, Clone)]
pub struct LicenseClient {
    client: reqwest::Client,
}

impl LicenseClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self, LicenseError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("keyward/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(LicenseError::ClientBuild)?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Validate `license` against the configured product.
    ///
    /// A `404` or a response whose `meta.valid` is not `true` is an invalid
    /// key, not an error.
    ///
    /// # Errors
    /// Returns an error when the request cannot be sent, or the response
    /// cannot be decoded.
    pub async fn validate(
        &self,
        endpoint: &DistributionEndpoint,
        license: &License,
    ) -> Result<LicenseValidation, LicenseError> {
        let url = validate_url(endpoint)?;
        let body = serde_json::to_vec(&ValidationRequest {
            meta: RequestMeta {
                key: license.key(),
                scope: RequestScope {
                    product: &endpoint.product,
                },
            },
        })
        .map_err(LicenseError::Encode)?;

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, JSON_API)
            .header(reqwest::header::ACCEPT, JSON_API)
            .body(body)
            .send()
            .await
            .map_err(LicenseError::Request)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!("License key not found");
            return Ok(LicenseValidation::Invalid { detail: None });
        }

        let bytes = response.bytes().await.map_err(LicenseError::Request)?;
        let parsed = match serde_json::from_slice::<ValidationResponse>(&bytes) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => return Err(LicenseError::Status(status)),
            Err(error) => return Err(LicenseError::Decode(error)),
        };

        if parsed.meta.valid {
            info!("License key validated");
            Ok(LicenseValidation::Valid)
        } else {
            debug!(
                "License key rejected: {}",
                parsed.meta.detail.as_deref().unwrap_or("no detail")
            );
            Ok(LicenseValidation::Invalid {
                detail: parsed.meta.detail,
            })
        }
    }
}
