use std::{path::PathBuf, time::Duration};

use cirrus_clock::DurationSecs;
use cirrus_tokens::{
    backoff::RetryPolicy, credentials, scopes::CLOUD_PLATFORM, sources::CredentialsTokenSource,
    Scopes, TokenCache, TokenStatus,
};
use clap::Parser;

#[derive(Debug, Parser)]
struct Opts {
    /// The credentials file to use instead of application default credentials
    #[arg(short, long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// The scopes to request, space-delimited
    #[arg(short, long, env, default_value = CLOUD_PLATFORM)]
    scopes: String,

    /// Seconds before expiry at which a token is considered stale
    #[arg(long, env, default_value_t = 60)]
    safety_margin: u64,

    /// Timeout for each request to the token endpoint, in seconds
    #[arg(long, env, default_value_t = 10)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = reqwest::Client::builder().build()?;
    let credential = credentials::discover(opts.credentials.as_deref())?;
    tracing::info!(kind = credential.kind(), "resolved credentials");

    let source = CredentialsTokenSource::new(
        client,
        credential,
        Scopes::from_delimited(&opts.scopes),
    )?
    .with_timeout(Duration::from_secs(opts.timeout));

    let cache = TokenCache::builder(source)
        .with_safety_margin(DurationSecs(opts.safety_margin))
        .with_retry_policy(RetryPolicy::default())
        .build();

    for attempt in 1..=2 {
        let token = cache.get().await?;
        let status = token.token_status();
        tracing::info!(
            attempt,
            ?status,
            token = format_args!("{:#?}", token.access_token()),
            scopes = %token.scopes(),
            stale = token.stale().0,
            expiry = token.expiry().0,
            "pulled token"
        );
        debug_assert_eq!(status, TokenStatus::Fresh);
    }

    cache.close().await;

    Ok(())
}
