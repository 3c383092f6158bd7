//! Wire format of the refresh call
//!
//! `POST <refresh_url>` with `{"refreshToken": "..."}`. A successful response
//! carries `{"accessToken": "...", "refreshToken": "..."}` where the refresh
//! token is optional. Only the refresh token is ever sent; the expired access
//! token stays out of this request.

use serde::{Deserialize, Serialize};
use transport::{RequestDescriptor, Response};

use crate::error::{Error, Result};

/// Body of the refresh call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Successful refresh response body.
///
/// Extra fields (the API also returns a human-readable `message`) are ignored.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl RefreshResponse {
    /// Parse a 2xx refresh response, rejecting bodies without an access token.
    pub fn from_response(response: &Response) -> Result<Self> {
        let parsed: RefreshResponse = response
            .json()
            .map_err(|e| Error::InvalidRefreshResponse(format!("malformed body: {e}")))?;
        if parsed.access_token.is_empty() {
            return Err(Error::InvalidRefreshResponse(
                "response carried an empty accessToken".into(),
            ));
        }
        Ok(parsed)
    }
}

/// Build the dedicated refresh descriptor, marked so it never triggers a refresh itself.
pub fn refresh_descriptor(url: &str, refresh_token: &str) -> transport::Result<RequestDescriptor> {
    Ok(RequestDescriptor::post(url)
        .with_json(&RefreshRequest { refresh_token })?
        .into_refresh_call())
}
