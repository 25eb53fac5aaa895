//! An identity provider backed by an OAuth2 token endpoint
//!
//! Implements the client credentials flow: credentials are posted to the
//! authority's token URL and the response's `expires_in` lifetime is used
//! to stamp the resulting [`Token`].

use std::marker::PhantomData;

use async_trait::async_trait;
use thiserror::Error;
use tokenguard_clock::{Clock, DurationMillis, System};

use super::IdentityProvider;
use crate::{error::ProviderError, Token};

pub mod dto;

/// An identity provider for the OAuth2 client credentials flow
#[derive(Debug)]
pub struct ClientCredentialsProvider<C = System, T = JsonBody> {
    client: reqwest::Client,
    token_url: reqwest::Url,
    credentials: dto::ClientCredentialsRequest,
    clock: C,
    content_type: PhantomData<fn() -> T>,
}

impl ClientCredentialsProvider<System, JsonBody> {
    /// Constructs a new client credentials provider using the system clock
    pub fn new(
        client: reqwest::Client,
        token_url: reqwest::Url,
        credentials: dto::ClientCredentialsRequest,
    ) -> Self {
        Self::with_clock(client, token_url, credentials, System)
    }
}

impl<C> ClientCredentialsProvider<C, JsonBody> {
    /// Constructs a new client credentials provider stamping token
    /// lifetimes against the given clock
    pub fn with_clock(
        client: reqwest::Client,
        token_url: reqwest::Url,
        credentials: dto::ClientCredentialsRequest,
        clock: C,
    ) -> Self {
        Self {
            client,
            token_url,
            credentials,
            clock,
            content_type: PhantomData,
        }
    }
}

impl<C, T> ClientCredentialsProvider<C, T> {
    /// Configures the provider to send credentials to the authority as
    /// URL-encoded form data instead of JSON
    pub fn using_form_data(self) -> ClientCredentialsProvider<C, FormBody> {
        ClientCredentialsProvider {
            client: self.client,
            token_url: self.token_url,
            credentials: self.credentials,
            clock: self.clock,
            content_type: PhantomData,
        }
    }
}

#[async_trait]
impl<C, T> IdentityProvider for ClientCredentialsProvider<C, T>
where
    C: Clock + Send + Sync,
    T: RequestType + Send + Sync,
{
    async fn request_token(&self) -> Result<Token, ProviderError> {
        let token = request_token::<_, T>(
            &self.client,
            self.token_url.clone(),
            &self.credentials,
            &self.clock,
        )
        .await?;
        Ok(token)
    }
}

/// An error while requesting a token from the authority
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// An error from the authority with an error body
    #[error("error requesting token from authority: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(reqwest::Error),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(reqwest::Error),
}

#[tracing::instrument(
    err,
    skip(client, token_url, credentials, clock),
    fields(
        token_url = %token_url,
        credentials.grant_type = "client_credentials",
        credentials.client_id = %credentials.client_id(),
    ),
)]
async fn request_token<C: Clock, T: RequestType>(
    client: &reqwest::Client,
    token_url: reqwest::Url,
    credentials: &dto::ClientCredentialsRequest,
    clock: &C,
) -> Result<Token, TokenRequestError> {
    tracing::trace!("requesting token from authority");

    let req = T::attach_payload(client.post(token_url), credentials);
    let resp = req.send().await.map_err(TokenRequestError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received token response from issuing authority"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp
            .text()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        return Err(TokenRequestError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(TokenRequestError::BodyReadError)?;
    let resp: dto::TokenResponse = serde_json::from_slice(&body)?;

    let received_at = clock.now();
    let expires_at = received_at + DurationMillis(resp.expires_in * 1_000);
    let token = Token::new(resp.access_token, expires_at, received_at);

    tracing::info!(
        lifetime_ms = token.lifetime().0,
        expires_at = token.expires_at().0,
        "received new token"
    );

    Ok(token)
}

/// A manner of attaching a serializable payload to a request
pub trait RequestType {
    /// Attaches the serializable payload to the request body
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder;
}

/// Attaches credentials to the request body as JSON
#[derive(Debug)]
pub struct JsonBody;

/// Attaches credentials to the request body as URL-encoded form data
#[derive(Debug)]
pub struct FormBody;

impl RequestType for JsonBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.json(payload)
    }
}

impl RequestType for FormBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.form(payload)
    }
}
