//! DTOs for interacting with OAuth2 token endpoints

use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};

use crate::{ClientId, ClientIdRef, ClientSecret, TokenValue};

/// Client credentials
#[derive(Debug, Serialize)]
pub struct ClientCredentials {
    /// The client ID
    pub client_id: ClientId,

    /// The client secret
    pub client_secret: ClientSecret,
}

/// A complete client credentials token request
#[derive(Debug)]
pub struct ClientCredentialsRequest {
    /// The client credentials
    pub credentials: Arc<ClientCredentials>,

    /// The scopes to request, space-joined on the wire
    pub scopes: Vec<String>,
}

impl ClientCredentialsRequest {
    pub(crate) fn client_id(&self) -> &ClientIdRef {
        &self.credentials.client_id
    }
}

impl Serialize for ClientCredentialsRequest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("ClientCredentialsRequest", 4)?;
        ser.serialize_field("grant_type", "client_credentials")?;
        ser.serialize_field("client_id", &self.credentials.client_id)?;
        ser.serialize_field("client_secret", &self.credentials.client_secret)?;
        if self.scopes.is_empty() {
            ser.skip_field("scope")?;
        } else {
            ser.serialize_field("scope", &self.scopes.join(" "))?;
        }
        ser.end()
    }
}

/// A token response from the authority
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// The issued credential
    pub access_token: TokenValue,

    /// Lifetime of the credential, in seconds
    pub expires_in: u64,
}
