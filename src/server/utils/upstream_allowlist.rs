use std::collections::HashSet;

use tracing::warn;

use crate::config::AppConfig;

/// hostnames the stream proxy is willing to fetch from. Built once at startup
/// from the configured list plus whatever hosts the catalogue source itself
/// lives on, so a default setup works without extra configuration.
pub struct UpstreamAllowlist {
    strict: bool,
    hosts: HashSet<String>,
}

fn parse_host(url_like: &str) -> Option<String> {
    url::Url::parse(url_like.trim())
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

impl UpstreamAllowlist {
    pub fn from_config(config: &AppConfig) -> Self {
        let mut hosts: HashSet<String> = config
            .upstream_allowlist
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(|h| h.trim().to_lowercase())
            .filter(|h| !h.is_empty())
            .collect();

        // the catalogue source is trusted by definition
        for derived in [&config.xtream_base_url, &config.original_playlist_url] {
            if let Some(host) = derived.as_deref().and_then(parse_host) {
                hosts.insert(host);
            }
        }

        if !config.strict_upstream_allowlist {
            warn!(
                "upstream allow-list is DISABLED - any host inside a valid stream token will be relayed"
            );
        }

        Self {
            strict: config.strict_upstream_allowlist,
            hosts,
        }
    }

    /// non-http(s) schemes are refused no matter what. In strict mode the host
    /// also has to be known; an empty allow-list in strict mode refuses everything.
    pub fn is_allowed(&self, raw_url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(raw_url.trim()) else {
            return false;
        };

        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }

        if !self.strict {
            return true;
        }

        parsed
            .host_str()
            .is_some_and(|h| self.hosts.contains(&h.to_lowercase()))
    }
}
