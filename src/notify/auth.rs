//! Sign-in-with-Ethereum style authentication against the media API
//!
//! 1. `getAuthMessage` returns a challenge for the operator address
//! 2. The challenge is signed with `personal_sign`
//! 3. `authenticate` exchanges address, challenge and signature for a JWT

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::chain::Wallet;
use crate::indexer::GraphQlClient;
use crate::types::{Result, SyncError};

const GET_AUTH_MESSAGE: &str = r#"
query GetAuthMessage($publicAddress: String!, $domain: String!, $uri: String!) {
  getAuthMessage(publicAddress: $publicAddress, domain: $domain, uri: $uri) {
    authMessage
  }
}
"#;

const AUTHENTICATE: &str = r#"
mutation Authenticate($input: AuthenticateInput!) {
  authenticate(input: $input) {
    jwt
    expiration
  }
}
"#;

/// Issued session token
#[derive(Clone)]
pub struct AuthToken {
    pub jwt: String,
    pub expiration: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("jwt", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl AuthToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.map(|exp| exp <= now).unwrap_or(false)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthMessageData {
    get_auth_message: Option<AuthMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthMessage {
    auth_message: String,
}

#[derive(Deserialize)]
struct AuthenticateData {
    authenticate: Option<AuthenticatePayload>,
}

#[derive(Deserialize)]
struct AuthenticatePayload {
    jwt: String,
    #[serde(default)]
    expiration: Option<serde_json::Value>,
}

/// Expiration arrives as an RFC 3339 string or epoch seconds/millis
fn parse_expiration(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| s.parse::<i64>().ok().and_then(from_epoch)),
        serde_json::Value::Number(n) => n.as_i64().and_then(from_epoch),
        _ => None,
    }
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    // Values past year 2286 in seconds are millisecond timestamps
    if value > 9_999_999_999 {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}

/// Obtains JWTs for the operator wallet
pub struct Authenticator {
    client: GraphQlClient,
    wallet: Arc<Wallet>,
    domain: String,
    uri: String,
}

impl Authenticator {
    pub fn new(client: GraphQlClient, wallet: Arc<Wallet>, domain: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            client,
            wallet,
            domain: domain.into(),
            uri: uri.into(),
        }
    }

    pub async fn authenticate(&self) -> Result<AuthToken> {
        let address = self.wallet.checksum_address();

        let data: AuthMessageData = self
            .client
            .execute(
                Some("GetAuthMessage"),
                GET_AUTH_MESSAGE,
                &json!({ "publicAddress": address, "domain": self.domain, "uri": self.uri }),
                None,
            )
            .await
            .map_err(|e| SyncError::Notify(format!("getAuthMessage failed: {}", e)))?;
        let message = data
            .get_auth_message
            .ok_or_else(|| SyncError::Notify("getAuthMessage returned no challenge".to_string()))?
            .auth_message;

        let signature = self
            .wallet
            .sign_message_hex(&message)
            .map_err(|e| SyncError::Notify(format!("signing auth message failed: {}", e)))?;

        let data: AuthenticateData = self
            .client
            .execute(
                Some("Authenticate"),
                AUTHENTICATE,
                &json!({ "input": { "publicAddress": address, "message": message, "signature": signature } }),
                None,
            )
            .await
            .map_err(|e| SyncError::Notify(format!("authenticate failed: {}", e)))?;
        let payload = data
            .authenticate
            .ok_or_else(|| SyncError::Notify("authenticate returned no token".to_string()))?;

        let token = AuthToken {
            jwt: payload.jwt,
            expiration: payload.expiration.as_ref().and_then(parse_expiration),
        };
        debug!(address = %address, expiration = ?token.expiration, "Authenticated with media API");
        Ok(token)
    }
}
