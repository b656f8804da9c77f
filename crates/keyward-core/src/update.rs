use std::time::Duration;

use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::context::UpdateContext;

/// A release the distribution service offered in answer to a check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdateDescriptor {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("failed to build update check client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("invalid distribution endpoint {url}: {details}")]
    InvalidEndpoint { url: String, details: String },
    #[error("failed to check for update: {0}")]
    Request(#[source] reqwest::Error),
    #[error("failed to parse update descriptor: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Build the update check URL for the given identity.
///
/// Shape: `{dist}/v1/{account}/{product}/update/{os}-{arch}/zip/{version}?key={license}`.
///
/// # Errors
/// Returns an error when the configured distribution base URL cannot be parsed
/// or cannot carry a path.
pub fn check_url(context: &UpdateContext) -> Result<reqwest::Url, UpdateError> {
    let base = &context.endpoint.dist_base_url;
    let invalid = |details: String| UpdateError::InvalidEndpoint {
        url: base.clone(),
        details,
    };

    let mut url = reqwest::Url::parse(base).map_err(|error| invalid(error.to_string()))?;
    let platform = context.platform.to_string();
    url.path_segments_mut()
        .map_err(|()| invalid("URL cannot be a base".to_string()))?
        .pop_if_empty()
        .extend([
            "v1",
            context.endpoint.account.as_str(),
            context.endpoint.product.as_str(),
            "update",
            platform.as_str(),
            "zip",
            context.version.as_str(),
        ]);
    url.query_pairs_mut()
        .append_pair("key", context.license.key());
    Ok(url)
}

/// Client for the distribution service's update endpoint.
///
/// Redirects are never followed: a `307 Temporary Redirect` is the signal that
/// an update exists, and following it would start downloading the artifact.
#[derive(Debug, Clone)]
pub struct DistributionClient {
    client: reqwest::Client,
}

impl DistributionClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .user_agent(format!("keyward/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(UpdateError::ClientBuild)?;
        Ok(Self { client })
    }

    /// Wrap an existing client. The caller is responsible for disabling
    /// redirect following on it.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Ask the distribution service whether a newer build exists.
    ///
    /// `Ok(None)` covers every response other than `307`, including success
    /// codes.
    ///
    /// # Errors
    /// Returns an error when the request cannot be sent or a redirect body
    /// cannot be decoded.
    pub async fn check_for_update(
        &self,
        context: &UpdateContext,
    ) -> Result<Option<UpdateDescriptor>, UpdateError> {
        let url = check_url(context)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(UpdateError::Request)?;

        let status = response.status();
        if status != reqwest::StatusCode::TEMPORARY_REDIRECT {
            debug!("No update available for {} (HTTP {status})", context.version);
            return Ok(None);
        }

        let descriptor = response
            .json::<UpdateDescriptor>()
            .await
            .map_err(UpdateError::Decode)?;
        debug!(
            "Update {} available for {} at {}",
            descriptor.name, context.version, descriptor.url
        );
        Ok(Some(descriptor))
    }

    /// Like [`Self::check_for_update`], with every failure read as "no update".
    pub async fn check(&self, context: &UpdateContext) -> Option<UpdateDescriptor> {
        match self.check_for_update(context).await {
            Ok(update) => update,
            Err(error) => {
                debug!("Update check failed: {error}");
                None
            }
        }
    }
}
