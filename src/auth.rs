use google_sheets4::{hyper, hyper_rustls, oauth2, Sheets};
use tracing::{debug, info};

use crate::cfg::{OAuthConfig, SheetsConfig};
use crate::error::{SyncError, SyncResult};

pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

pub type SheetsHub = Sheets<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>;

/// Installed-application client secret assembled from configuration.
pub fn application_secret(oauth: &OAuthConfig) -> oauth2::ApplicationSecret {
    oauth2::ApplicationSecret {
        client_id: oauth.client_id.clone(),
        client_secret: oauth.client_secret.clone(),
        project_id: Some(oauth.project_id.clone()),
        auth_uri: oauth.auth_uri.clone(),
        token_uri: oauth.token_uri.clone(),
        auth_provider_x509_cert_url: Some(oauth.auth_provider_x509_cert_url.clone()),
        redirect_uris: vec![oauth.redirect_uri.clone()],
        ..Default::default()
    }
}

/// Runs the OAuth installed flow (reusing cached tokens when present) and
/// builds a Sheets hub on top of it.
pub async fn create_sheets_hub(config: &SheetsConfig) -> SyncResult<SheetsHub> {
    info!("Initializing Google Sheets authentication");

    let secret = application_secret(&config.oauth);
    let auth = oauth2::InstalledFlowAuthenticator::builder(
        secret,
        oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(&config.token_cache_path)
    .build()
    .await
    .map_err(|e| SyncError::Auth(format!("failed to build authenticator: {}", e)))?;

    // Fetch a token now so a bad client secret fails here rather than on the first write.
    auth.token(&[SPREADSHEETS_SCOPE])
        .await
        .map_err(|e| SyncError::Auth(format!("failed to obtain access token: {}", e)))?;
    debug!("Access token cached at {}", config.token_cache_path);

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| SyncError::Connection(format!("failed to load native roots: {}", e)))?
        .https_or_http()
        .enable_http1()
        .build();
    let client = hyper::Client::builder().build::<_, hyper::Body>(https);

    Ok(Sheets::new(client, auth))
}
