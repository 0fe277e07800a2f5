use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::server::dtos::channel_dto::{
    ChannelKind, ChannelQuery, ChannelsPage, GroupCount, StreamFormat,
};
use crate::server::error::{AppResult, Error};
use crate::server::services::catalogue_services::{
    CATALOGUE_TTL, CATALOGUE_USER_AGENT, CatalogueCache, CatalogueServiceTrait, Channel,
    Generation, build_masked_m3u, group_counts, page_channels,
};
use crate::server::services::url_cipher_services::UrlCipher;

const XTREAM_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// xtream panels are wildly inconsistent about their json: arrays at the top
/// level, arrays under different keys, or keyed objects. Try the candidate
/// keys, then fall back to the object's values.
fn value_list(data: Option<Value>, candidate_keys: &[&str]) -> Vec<Value> {
    match data {
        Some(Value::Array(list)) => list,
        Some(Value::Object(map)) => {
            for key in candidate_keys {
                if let Some(Value::Array(list)) = map.get(*key) {
                    return list.clone();
                }
            }
            map.into_iter().map(|(_, v)| v).collect()
        }
        _ => Vec::new(),
    }
}

/// first non-empty string (or number, stringified) among the candidate fields
fn field_string(value: &Value, candidate_keys: &[&str]) -> Option<String> {
    for key in candidate_keys {
        match value.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn sanitize_container_extension(ext: Option<String>) -> String {
    let cleaned: String = ext
        .unwrap_or_default()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if cleaned.is_empty() { "mp4".to_string() } else { cleaned }
}

/// catalogue backed by an Xtream Codes panel: live streams plus optional vod,
/// all through player_api.php. The panel credentials live in the upstream
/// urls we build here, which is exactly why those urls get encrypted before
/// anything leaves the process.
pub struct XtreamCatalogueService {
    http: reqwest::Client,
    cipher: Arc<UrlCipher>,
    proxy_url: String,
    base_url: String,
    username: String,
    password: String,
    live_format: StreamFormat,
    include_vod: bool,
    cache: CatalogueCache,
}

impl XtreamCatalogueService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: reqwest::Client,
        cipher: Arc<UrlCipher>,
        proxy_url: &str,
        base_url: &str,
        username: &str,
        password: &str,
        live_format: &str,
        include_vod: bool,
    ) -> Self {
        Self {
            http,
            cipher,
            proxy_url: proxy_url.trim_end_matches('/').to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            live_format: if live_format.eq_ignore_ascii_case("ts") {
                StreamFormat::Ts
            } else {
                StreamFormat::Hls
            },
            include_vod,
            cache: CatalogueCache::new(CATALOGUE_TTL),
        }
    }

    fn live_url(&self, stream_id: &str) -> String {
        let ext = match self.live_format {
            StreamFormat::Ts => "ts",
            _ => "m3u8",
        };
        format!(
            "{}/live/{}/{}/{}.{}",
            self.base_url, self.username, self.password, stream_id, ext
        )
    }

    fn vod_url(&self, stream_id: &str, container_extension: Option<String>) -> String {
        format!(
            "{}/movie/{}/{}/{}.{}",
            self.base_url,
            self.username,
            self.password,
            stream_id,
            sanitize_container_extension(container_extension)
        )
    }

    async fn player_api(&self, action: Option<&str>) -> Option<Value> {
        let mut request = self
            .http
            .get(format!("{}/player_api.php", self.base_url))
            .timeout(XTREAM_FETCH_TIMEOUT)
            .header(reqwest::header::USER_AGENT, CATALOGUE_USER_AGENT)
            .query(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ]);
        if let Some(action) = action {
            request = request.query(&[("action", action)]);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                response.json::<Value>().await.ok()
            }
            Ok(response) => {
                warn!("xtream api returned {}", response.status());
                None
            }
            Err(e) => {
                error!("xtream api request failed: {}", e);
                None
            }
        }
    }

    async fn category_map(
        &self,
        action: &str,
        candidate_keys: &[&str],
    ) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for category in value_list(self.player_api(Some(action)).await, candidate_keys) {
            let id = field_string(&category, &["category_id", "id"]);
            let name = field_string(&category, &["category_name", "name"]);
            if let (Some(id), Some(name)) = (id, name) {
                map.insert(id, name);
            }
        }
        map
    }

    fn live_channel(&self, stream: &Value, categories: &HashMap<String, String>) -> Channel {
        let stream_id =
            field_string(stream, &["num_id", "stream_id", "id"]).unwrap_or_else(|| "0".to_string());

        let group_title = field_string(stream, &["category_id", "cid"])
            .and_then(|id| categories.get(&id).cloned())
            .or_else(|| field_string(stream, &["category_name"]))
            .unwrap_or_else(|| "Live".to_string());

        Channel {
            id: format!("live-{stream_id}"),
            kind: ChannelKind::Live,
            name: field_string(stream, &["name"]).unwrap_or_else(|| "Channel".to_string()),
            tvg_id: field_string(stream, &["epg_channel_id"]).unwrap_or_else(|| stream_id.clone()),
            tvg_logo: field_string(stream, &["stream_icon", "logo"]).unwrap_or_default(),
            group_title,
            format: self.live_format,
            original_url: self.live_url(&stream_id),
        }
    }

    fn vod_channel(&self, stream: &Value, categories: &HashMap<String, String>) -> Channel {
        let stream_id =
            field_string(stream, &["stream_id", "num_id", "id"]).unwrap_or_else(|| "0".to_string());

        let category_name = field_string(stream, &["category_id", "cid"])
            .and_then(|id| categories.get(&id).cloned())
            .or_else(|| field_string(stream, &["category_name"]))
            .unwrap_or_else(|| "Movies".to_string());

        Channel {
            id: format!("movie-{stream_id}"),
            kind: ChannelKind::Movie,
            name: field_string(stream, &["name"]).unwrap_or_else(|| "Movie".to_string()),
            tvg_id: format!("movie-{stream_id}"),
            tvg_logo: field_string(stream, &["stream_icon", "cover", "logo"]).unwrap_or_default(),
            group_title: format!("Movies / {category_name}"),
            format: StreamFormat::Direct,
            original_url: self.vod_url(&stream_id, field_string(stream, &["container_extension"])),
        }
    }

    async fn rebuild(&self) -> AppResult<Generation> {
        let (live_data, live_categories) = futures::join!(
            self.player_api(Some("get_live_streams")),
            self.category_map("get_live_categories", &["categories", "live_categories"]),
        );

        // a panel that answers nothing gets an error, not a cached-empty
        // catalogue that would stick around for the full ttl
        if live_data.is_none() {
            return Err(Error::UpstreamUnavailable);
        }

        let mut channels: Vec<Channel> =
            value_list(live_data, &["live_streams", "streams"])
                .iter()
                .map(|stream| self.live_channel(stream, &live_categories))
                .collect();

        if self.include_vod {
            let (vod_data, vod_categories) = futures::join!(
                self.player_api(Some("get_vod_streams")),
                self.category_map("get_vod_categories", &["categories", "vod_categories"]),
            );
            channels.extend(
                value_list(vod_data, &["vod_streams", "movie_streams", "streams"])
                    .iter()
                    .map(|stream| self.vod_channel(stream, &vod_categories)),
            );
        }

        info!("xtream catalogue refreshed: {} channels", channels.len());
        Ok(Generation::new(channels, None))
    }

    async fn generation(&self) -> AppResult<Generation> {
        self.cache.current(|| self.rebuild()).await
    }
}

#[async_trait]
impl CatalogueServiceTrait for XtreamCatalogueService {
    async fn masked_playlist(&self, auth_token: &str) -> AppResult<String> {
        let generation = self.generation().await?;
        Ok(build_masked_m3u(
            &generation.channels,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CargoEnv;
    use serde_json::json;

    fn service(live_format: &str, include_vod: bool) -> XtreamCatalogueService {
        let cipher = Arc::new(
            UrlCipher::from_secret(Some("test_secret"), CargoEnv::Development)
                .expect("cipher construction"),
        );
        XtreamCatalogueService::new(
            reqwest::Client::new(),
            cipher,
            "http://proxy.local:3001",
            "http://panel.example:8080/",
            "alice",
            "hunter2",
            live_format,
            include_vod,
        )
    }

    #[test]
    fn test_value_list_accepts_every_panel_shape() {
        // bare array
        let list = value_list(Some(json!([{"a": 1}, {"a": 2}])), &["streams"]);
        assert_eq!(list.len(), 2);

        // array under one of the candidate keys
        let list = value_list(
            Some(json!({"live_streams": [{"a": 1}]})),
            &["live_streams", "streams"],
        );
        assert_eq!(list.len(), 1);

        // keyed object with no matching key falls back to its values
        let list = value_list(
            Some(json!({"1": {"name": "x"}, "2": {"name": "y"}})),
            &["streams"],
        );
        assert_eq!(list.len(), 2);

        // missing or scalar payloads read as empty
        assert!(value_list(None, &["streams"]).is_empty());
        assert!(value_list(Some(json!("nope")), &["streams"]).is_empty());
    }

    #[test]
    fn test_field_string_takes_strings_and_numbers() {
        let value = json!({"stream_id": 42, "name": "  CNN  ", "empty": "   "});

        assert_eq!(
            field_string(&value, &["stream_id"]).as_deref(),
            Some("42")
        );
        assert_eq!(field_string(&value, &["name"]).as_deref(), Some("CNN"));
        // blank strings don't count, the next candidate gets a chance
        assert_eq!(
            field_string(&value, &["empty", "stream_id"]).as_deref(),
            Some("42")
        );
        assert_eq!(field_string(&value, &["missing"]), None);
    }

    #[test]
    fn test_sanitizes_container_extensions() {
        assert_eq!(sanitize_container_extension(Some("MKV".to_string())), "mkv");
        assert_eq!(
            sanitize_container_extension(Some("../../../etc/passwd".to_string())),
            "etcpasswd"
        );
        assert_eq!(sanitize_container_extension(Some("".to_string())), "mp4");
        assert_eq!(sanitize_container_extension(None), "mp4");
    }

    #[test]
    fn test_builds_live_channel_with_category_lookup() {
        let service = service("m3u8", true);
        let mut categories = HashMap::new();
        categories.insert("7".to_string(), "News".to_string());

        // ids arrive as numbers from some panels
        let stream = json!({
            "stream_id": 101,
            "name": "Channel One",
            "epg_channel_id": "one.uk",
            "stream_icon": "http://logo/1.png",
            "category_id": 7
        });

        let channel = service.live_channel(&stream, &categories);
        assert_eq!(channel.id, "live-101");
        assert_eq!(channel.kind, ChannelKind::Live);
        assert_eq!(channel.name, "Channel One");
        assert_eq!(channel.tvg_id, "one.uk");
        assert_eq!(channel.group_title, "News");
        assert_eq!(channel.format, StreamFormat::Hls);
        assert_eq!(
            channel.original_url,
            "http://panel.example:8080/live/alice/hunter2/101.m3u8"
        );
    }

    #[test]
    fn test_live_format_toggle_switches_extension() {
        let service = service("ts", false);
        let stream = json!({"stream_id": "5", "name": "Raw Feed"});

        let channel = service.live_channel(&stream, &HashMap::new());
        assert_eq!(channel.format, StreamFormat::Ts);
        assert_eq!(channel.group_title, "Live");
        assert!(channel.original_url.ends_with("/live/alice/hunter2/5.ts"));
    }

    #[test]
    fn test_builds_vod_channel_with_container_extension() {
        let service = service("m3u8", true);
        let mut categories = HashMap::new();
        categories.insert("3".to_string(), "Action".to_string());

        let stream = json!({
            "stream_id": "900",
            "name": "Big Movie",
            "cover": "http://logo/movie.png",
            "category_id": "3",
            "container_extension": "MKV"
        });

        let channel = service.vod_channel(&stream, &categories);
        assert_eq!(channel.id, "movie-900");
        assert_eq!(channel.kind, ChannelKind::Movie);
        assert_eq!(channel.group_title, "Movies / Action");
        assert_eq!(channel.format, StreamFormat::Direct);
        assert_eq!(channel.tvg_logo, "http://logo/movie.png");
        assert_eq!(
            channel.original_url,
            "http://panel.example:8080/movie/alice/hunter2/900.mkv"
        );
    }

    #[test]
    fn test_unknown_category_falls_back_to_defaults() {
        let service = service("m3u8", true);
        let live = json!({"stream_id": 1, "name": "Orphan"});
        let vod = json!({"stream_id": 2, "name": "Orphan Movie"});

        assert_eq!(
            service.live_channel(&live, &HashMap::new()).group_title,
            "Live"
        );
        assert_eq!(
            service.vod_channel(&vod, &HashMap::new()).group_title,
            "Movies / Movies"
        );
    }
}
