pub mod catalogue_services;
pub mod ip_guard_services;
pub mod playlist_rewriter_services;
pub mod stream_session_services;
pub mod url_cipher_services;
pub mod xtream_services;

pub use catalogue_services::DynCatalogueService;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::AppConfig;
use crate::server::services::catalogue_services::{M3uCatalogueService, PlaylistSource};
use crate::server::services::ip_guard_services::{IpGuardConfig, IpGuardService};
use crate::server::services::playlist_rewriter_services::PlaylistRewriter;
use crate::server::services::stream_session_services::{SessionLimits, StreamSessionService};
use crate::server::services::url_cipher_services::UrlCipher;
use crate::server::services::xtream_services::XtreamCatalogueService;
use crate::server::utils::upstream_allowlist::UpstreamAllowlist;

/// the relay's entire shared state - handed to the router as one extension.
/// everything is in-memory, empty at startup, gone at shutdown.
#[derive(Clone)]
pub struct RelayServices {
    pub cipher: Arc<UrlCipher>,
    pub rewriter: Arc<PlaylistRewriter>,
    pub sessions: Arc<StreamSessionService>,
    pub ip_guard: Arc<IpGuardService>,
    pub catalogue: DynCatalogueService,
    pub allowlist: Arc<UpstreamAllowlist>,
    pub http: reqwest::Client,
    pub config: Arc<AppConfig>,
}

fn configured(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl RelayServices {
    pub fn new(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        info!("starting relay services (in-memory, no database)...");

        let cipher = Arc::new(UrlCipher::from_secret(
            config.encryption_key.as_deref(),
            config.cargo_env,
        )?);

        let proxy_url = config.proxy_url.trim_end_matches('/').to_string();
        let rewriter = Arc::new(PlaylistRewriter::new(cipher.clone(), &proxy_url));

        let sessions = Arc::new(StreamSessionService::new(SessionLimits::from(
            config.as_ref(),
        )));
        let ip_guard = Arc::new(IpGuardService::new(IpGuardConfig::from(config.as_ref())));
        let allowlist = Arc::new(UpstreamAllowlist::from_config(&config));

        // no total timeout on the client itself - raw media relays run as long
        // as the viewer watches. Catalogue and manifest fetches set per-request
        // timeouts.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let catalogue: DynCatalogueService = match (
            configured(&config.xtream_base_url),
            configured(&config.xtream_username),
            configured(&config.xtream_password),
        ) {
            (Some(base_url), Some(username), Some(password)) => {
                info!("catalogue source: xtream api at configured panel");
                Arc::new(XtreamCatalogueService::new(
                    http.clone(),
                    cipher.clone(),
                    &proxy_url,
                    base_url,
                    username,
                    password,
                    &config.xtream_live_format,
                    config.xtream_include_vod,
                ))
            }
            _ => {
                let source = if let Some(file) = configured(&config.original_playlist_file) {
                    info!("catalogue source: local playlist file");
                    PlaylistSource::File(PathBuf::from(file))
                } else if let Some(url) = configured(&config.original_playlist_url) {
                    info!("catalogue source: remote playlist url");
                    PlaylistSource::Url(url.to_string())
                } else {
                    anyhow::bail!(
                        "no catalogue source configured - set XTREAM_BASE_URL/XTREAM_USERNAME/XTREAM_PASSWORD or ORIGINAL_PLAYLIST_FILE/ORIGINAL_PLAYLIST_URL"
                    );
                };
                Arc::new(M3uCatalogueService::new(
                    http.clone(),
                    cipher.clone(),
                    &proxy_url,
                    source,
                ))
            }
        };

        Ok(Self {
            cipher,
            rewriter,
            sessions,
            ip_guard,
            catalogue,
            allowlist,
            http,
            config,
        })
    }

    /// background sweeps for the session table and the ip guard
    pub fn spawn_maintenance(&self) {
        self.sessions.spawn_sweeper();
        self.ip_guard.spawn_sweeper();
    }
}
