use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mockall::automock;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

use crate::server::dtos::channel_dto::{
    ChannelDescriptor, ChannelKind, ChannelQuery, ChannelsPage, GroupCount, NormalizedChannelQuery,
    StreamFormat,
};
use crate::server::error::{AppResult, Error};
use crate::server::services::url_cipher_services::UrlCipher;
use crate::server::utils::stream_probe;

/// the catalogue barely changes upstream, one refresh per 6 hours is plenty
pub(crate) const CATALOGUE_TTL: Duration = Duration::from_secs(6 * 60 * 60);

pub(crate) const CATALOGUE_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const CATALOGUE_USER_AGENT: &str = "Mozilla/5.0 (compatible; IPTV-Relay/1.0)";

static TVG_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"tvg-id="([^"]*)""#).expect("static regex"));
static TVG_LOGO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"tvg-logo="([^"]*)""#).expect("static regex"));
static GROUP_TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"group-title="([^"]*)""#).expect("static regex"));
static DISPLAY_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r",(.+)$").expect("static regex"));

/// one playable item, server side. `original_url` never leaves this module
/// unencrypted - external structures only ever carry the masked form
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    pub kind: ChannelKind,
    pub name: String,
    pub tvg_id: String,
    pub tvg_logo: String,
    pub group_title: String,
    pub format: StreamFormat,
    pub original_url: String,
}

pub type DynCatalogueService = Arc<dyn CatalogueServiceTrait + Send + Sync>;

#[automock]
#[async_trait]
pub trait CatalogueServiceTrait {
    /// the full masked m3u manifest for this caller
    async fn masked_playlist(&self, auth_token: &str) -> AppResult<String>;

    /// paginated, filterable channel listing with masked stream urls
    async fn channels_page(&self, auth_token: &str, query: &ChannelQuery)
    -> AppResult<ChannelsPage>;

    /// category titles with channel counts, sorted by title
    async fn channel_groups(&self) -> AppResult<Vec<GroupCount>>;
}

// ---------------------------------------------------------------------------
// generation cache shared by both catalogue implementations

#[derive(Clone)]
pub(crate) struct Generation {
    pub channels: Arc<Vec<Channel>>,
    // raw playlist text, kept only for the m3u source so the masked manifest
    // preserves every non-url line of the original
    pub raw_playlist: Option<Arc<String>>,
    fetched_at: Instant,
}

impl Generation {
    pub(crate) fn new(channels: Vec<Channel>, raw_playlist: Option<String>) -> Self {
        Self {
            channels: Arc::new(channels),
            raw_playlist: raw_playlist.map(Arc::new),
            fetched_at: Instant::now(),
        }
    }
}

/// fixed-ttl catalogue cache, replaced wholesale - readers never observe a
/// half-built generation. Refreshes are single-flighted: a caller arriving
/// while a rebuild is running waits on the mutex and reuses the fresh result
/// instead of doubling load on the upstream provider.
pub(crate) struct CatalogueCache {
    generation: RwLock<Option<Generation>>,
    refresh_lock: Mutex<()>,
    ttl: Duration,
}

impl CatalogueCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            generation: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            ttl,
        }
    }

    async fn fresh(&self) -> Option<Generation> {
        self.generation
            .read()
            .await
            .as_ref()
            .filter(|generation| generation.fetched_at.elapsed() < self.ttl)
            .cloned()
    }

    pub(crate) async fn current<F, Fut>(&self, rebuild: F) -> AppResult<Generation>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<Generation>>,
    {
        if let Some(generation) = self.fresh().await {
            return Ok(generation);
        }

        let _guard = self.refresh_lock.lock().await;

        // someone else may have refreshed while we waited on the lock
        if let Some(generation) = self.fresh().await {
            return Ok(generation);
        }

        let generation = rebuild().await?;
        *self.generation.write().await = Some(generation.clone());
        Ok(generation)
    }
}

// ---------------------------------------------------------------------------
// masking + listing helpers shared by both implementations

pub(crate) fn masked_stream_url(
    cipher: &UrlCipher,
    proxy_url: &str,
    upstream_url: &str,
    auth_token: &str,
) -> String {
    let token = cipher.encrypt_url(upstream_url);
    if auth_token.is_empty() {
        format!("{proxy_url}/stream/{token}")
    } else {
        // players like vlc can't send auth headers, the bearer rides the query
        format!(
            "{proxy_url}/stream/{token}?token={}",
            urlencoding::encode(auth_token)
        )
    }
}

fn matches_query(channel: &Channel, query: &NormalizedChannelQuery) -> bool {
    if !query.group.is_empty() && channel.group_title != query.group {
        return false;
    }
    if query.q.is_empty() {
        return true;
    }
    channel.name.to_lowercase().contains(&query.q)
        || channel.group_title.to_lowercase().contains(&query.q)
}

pub(crate) fn page_channels(
    channels: &[Channel],
    query: &ChannelQuery,
    cipher: &UrlCipher,
    proxy_url: &str,
    auth_token: &str,
) -> ChannelsPage {
    let query = query.normalize();

    let filtered: Vec<&Channel> = channels
        .iter()
        .filter(|channel| matches_query(channel, &query))
        .collect();

    let page: Vec<ChannelDescriptor> = filtered
        .iter()
        .skip(query.offset)
        .take(query.limit)
        .map(|channel| ChannelDescriptor {
            id: channel.id.clone(),
            kind: channel.kind,
            name: channel.name.clone(),
            tvg_id: channel.tvg_id.clone(),
            tvg_logo: channel.tvg_logo.clone(),
            group_title: channel.group_title.clone(),
            format: channel.format,
            stream_url: masked_stream_url(cipher, proxy_url, &channel.original_url, auth_token),
        })
        .collect();

    ChannelsPage {
        total: filtered.len(),
        offset: query.offset,
        limit: query.limit,
        channels: page,
    }
}

pub(crate) fn group_counts(channels: &[Channel]) -> Vec<GroupCount> {
    // btreemap gives the sorted-by-title order for free
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for channel in channels {
        *counts.entry(channel.group_title.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(title, count)| GroupCount {
            title: title.to_string(),
            count,
        })
        .collect()
}

pub(crate) fn build_masked_m3u(
    channels: &[Channel],
    cipher: &UrlCipher,
    proxy_url: &str,
    auth_token: &str,
) -> String {
    let mut lines = Vec::with_capacity(channels.len() * 2 + 1);
    lines.push("#EXTM3U".to_string());

    for channel in channels {
        lines.push(format!(
            "#EXTINF:-1 tvg-id=\"{}\" tvg-logo=\"{}\" group-title=\"{}\",{}",
            channel.tvg_id, channel.tvg_logo, channel.group_title, channel.name
        ));
        lines.push(masked_stream_url(
            cipher,
            proxy_url,
            &channel.original_url,
            auth_token,
        ));
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// m3u-sourced catalogue

/// parses `#EXTINF:-1 tvg-id="..." tvg-logo="..." group-title="...",Name`
/// followed by the stream url on the next line. Anything that doesn't fit
/// that shape is skipped, not an error - provider playlists are messy.
pub fn parse_channels_from_m3u(content: &str) -> Vec<Channel> {
    let lines: Vec<&str> = content.lines().collect();
    let mut channels = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if !line.starts_with("#EXTINF") {
            continue;
        }

        let Some(url_line) = lines.get(i + 1).map(|l| l.trim()) else {
            continue;
        };
        if !url_line.starts_with("http://") && !url_line.starts_with("https://") {
            continue;
        }

        let capture = |re: &Regex| {
            re.captures(line)
                .map(|c| c[1].trim().to_string())
                .unwrap_or_default()
        };

        let name = DISPLAY_NAME_RE
            .captures(line)
            .map(|c| c[1].trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Channel".to_string());

        let group_title = {
            let group = capture(&GROUP_TITLE_RE);
            if group.is_empty() { "General".to_string() } else { group }
        };

        let format = if stream_probe::is_manifest_url(url_line) {
            StreamFormat::Hls
        } else if stream_probe::is_transport_stream_url(url_line) {
            StreamFormat::Ts
        } else {
            StreamFormat::Direct
        };

        channels.push(Channel {
            id: channels.len().to_string(),
            kind: ChannelKind::Live,
            name,
            tvg_id: capture(&TVG_ID_RE),
            tvg_logo: capture(&TVG_LOGO_RE),
            group_title,
            format,
            original_url: url_line.to_string(),
        });
    }

    channels
}

/// masks a raw m3u document in place: every url line following an #EXTINF is
/// swapped for its proxied form, everything else is preserved byte for byte
pub(crate) fn mask_original_playlist(
    content: &str,
    cipher: &UrlCipher,
    proxy_url: &str,
    auth_token: &str,
) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut out = Vec::with_capacity(lines.len());

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        out.push(line.to_string());

        if line.starts_with("#EXTINF") {
            if let Some(next) = lines.get(i + 1).map(|l| l.trim()) {
                if next.starts_with("http://") || next.starts_with("https://") {
                    out.push(masked_stream_url(cipher, proxy_url, next, auth_token));
                    i += 1;
                }
            }
        }

        i += 1;
    }

    out.join("\n")
}

#[derive(Debug, Clone)]
pub enum PlaylistSource {
    File(PathBuf),
    Url(String),
}

/// catalogue backed by a static m3u playlist. Only the proxy ever reads the
/// source; clients get the masked rendition.
pub struct M3uCatalogueService {
    http: reqwest::Client,
    cipher: Arc<UrlCipher>,
    proxy_url: String,
    source: PlaylistSource,
    cache: CatalogueCache,
}

impl M3uCatalogueService {
    pub fn new(
        http: reqwest::Client,
        cipher: Arc<UrlCipher>,
        proxy_url: &str,
        source: PlaylistSource,
    ) -> Self {
        Self {
            http,
            cipher,
            proxy_url: proxy_url.trim_end_matches('/').to_string(),
            source,
            cache: CatalogueCache::new(CATALOGUE_TTL),
        }
    }

    async fn fetch_original(&self) -> AppResult<String> {
        match &self.source {
            PlaylistSource::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                error!("failed to read playlist file {:?}: {}", path, e);
                Error::InternalServerErrorWithContext("playlist source unreadable".to_string())
            }),
            PlaylistSource::Url(url) => {
                let response = self
                    .http
                    .get(url)
                    .timeout(CATALOGUE_FETCH_TIMEOUT)
                    .header(reqwest::header::USER_AGENT, CATALOGUE_USER_AGENT)
                    .send()
                    .await
                    .map_err(|e| {
                        error!("playlist source fetch failed: {}", e);
                        Error::UpstreamUnavailable
                    })?;

                if !response.status().is_success() {
                    error!("playlist source returned {}", response.status());
                    return Err(Error::UpstreamUnavailable);
                }

                response.text().await.map_err(|e| {
                    error!("failed to read playlist source body: {}", e);
                    Error::UpstreamUnavailable
                })
            }
        }
    }

    async fn rebuild(&self) -> AppResult<Generation> {
        let content = self.fetch_original().await?;
        let channels = parse_channels_from_m3u(&content);
        info!("m3u catalogue refreshed: {} channels", channels.len());
        Ok(Generation::new(channels, Some(content)))
    }

    async fn generation(&self) -> AppResult<Generation> {
        self.cache.current(|| self.rebuild()).await
    }
}

#[async_trait]
impl CatalogueServiceTrait for M3uCatalogueService {
    async fn masked_playlist(&self, auth_token: &str) -> AppResult<String> {
        let generation = self.generation().await?;
        let raw = generation
            .raw_playlist
            .as_ref()
            .ok_or(Error::InternalServerError)?;
        Ok(mask_original_playlist(
            raw,
            &self.cipher,
            &self.proxy_url,
            auth_token,
        ))
    }

    async fn channels_page(
        &self,
        auth_token: &str,
        query: &ChannelQuery,
    ) -> AppResult<ChannelsPage> {
        let generation = self.generation().await?;
        Ok(page_channels(
            &generation.channels,
            query,
            &self.cipher,
            &self.proxy_url,
            auth_token,
        ))
    }

    async fn channel_groups(&self) -> AppResult<Vec<GroupCount>> {
        let generation = self.generation().await?;
        Ok(group_counts(&generation.channels))
    }
}
