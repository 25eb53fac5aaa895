use std::sync::Arc;

use clap::Parser;
use tokenguard::{
    sources::oauth2, ClientId, ClientSecret, Token, TokenAuthConfig, TokenListener, TokenManager,
};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The issuing authority's token request URL
    #[arg(short, long, env)]
    token_url: reqwest::Url,

    /// The client ID of the client
    #[arg(short, long, env)]
    client_id: ClientId,

    /// The client secret used to identify the client to the issuing authority
    #[arg(short = 's', long, env, hide_env_values = true)]
    client_secret: ClientSecret,

    /// Scopes to request, space-joined on the wire
    #[arg(long, env)]
    scopes: Vec<String>,
}

struct LogListener;

impl TokenListener for LogListener {
    fn on_token_renewed(&self, token: &Token) {
        tracing::info!(
            token = format_args!("{:#?}", token.value()),
            expires_at = token.expires_at().0,
            "token renewed"
        );
    }

    fn on_error(&self, error: &tokenguard::Error) {
        tracing::error!(%error, "token renewal failed terminally");
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = reqwest::Client::builder().https_only(true).build()?;

    let provider = oauth2::ClientCredentialsProvider::new(
        client,
        opts.token_url,
        oauth2::dto::ClientCredentialsRequest {
            credentials: Arc::new(oauth2::dto::ClientCredentials {
                client_id: opts.client_id,
                client_secret: opts.client_secret,
            }),
            scopes: opts.scopes,
        },
    )
    .using_form_data();

    let config = TokenAuthConfig::builder()
        .identity_provider(Arc::new(provider))
        .build()?;

    let manager = TokenManager::new(
        config.identity_provider(),
        config.token_manager_config().clone(),
    );

    let first = manager.start(LogListener, true).await?;
    if let Some(token) = first {
        tracing::info!(
            token = format_args!("{:#?}", token.value()),
            "first access token"
        );
    }

    let mut interval = time::interval(time::Duration::from_secs(5));
    loop {
        interval.tick().await;

        match manager.current_token() {
            Some(token) if !token.is_expired() => {
                tracing::debug!(ttl_ms = token.ttl().0, "pulled token")
            }
            Some(token) => {
                tracing::error!(expires_at = token.expires_at().0, "pulled expired token")
            }
            None => tracing::warn!("no token available"),
        }
    }
}
