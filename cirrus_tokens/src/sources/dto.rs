//! DTOs for interacting with token endpoints

use cirrus_clock::DurationSecs;
use serde::{Deserialize, Serialize};

use crate::{AccessToken, AssertionRef, ClientIdRef, ClientSecretRef, RefreshTokenRef};

pub(super) const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

#[derive(Serialize)]
pub(super) struct JwtBearerGrant<'a> {
    pub grant_type: &'static str,
    pub assertion: &'a AssertionRef,
}

#[derive(Serialize)]
pub(super) struct RefreshTokenGrant<'a> {
    pub grant_type: &'static str,
    pub client_id: &'a ClientIdRef,
    pub client_secret: &'a ClientSecretRef,
    pub refresh_token: &'a RefreshTokenRef,
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: AccessToken,
    pub expires_in: DurationSecs,
    #[serde(default)]
    pub scope: Option<String>,
}
