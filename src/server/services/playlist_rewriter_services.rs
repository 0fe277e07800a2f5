use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::server::services::url_cipher_services::UrlCipher;

// URI="..." attributes inside tags: encryption keys (#EXT-X-KEY),
// init segments (#EXT-X-MAP), iframe playlists
static URI_ATTR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"URI="([^"]+)""#).expect("static regex"));

/// rewrites hls/m3u manifests so every child reference - sub-playlists,
/// segments, keys, init maps - resolves through the proxy. The rewritten
/// document is referentially self-contained: a player that can reach this
/// proxy needs no other network access.
///
/// rewriting happens at fetch time, once, and is never cached in rewritten
/// form (the embedded tokens carry the caller's bearer credential).
pub struct PlaylistRewriter {
    cipher: Arc<UrlCipher>,
    proxy_url: String,
}

impl PlaylistRewriter {
    pub fn new(cipher: Arc<UrlCipher>, proxy_url: &str) -> Self {
        Self {
            cipher,
            proxy_url: proxy_url.trim_end_matches('/').to_string(),
        }
    }

    /// masked proxy link for an absolute upstream url. Query params only when
    /// non-empty so file-style players don't choke on dangling separators
    pub fn proxied_stream_url(&self, absolute_url: &str, auth_token: &str, sid: &str) -> String {
        let token = self.cipher.encrypt_url(absolute_url);

        let mut params: Vec<String> = Vec::with_capacity(2);
        if !auth_token.is_empty() {
            params.push(format!("token={}", urlencoding::encode(auth_token)));
        }
        if !sid.is_empty() {
            params.push(format!("sid={}", urlencoding::encode(sid)));
        }

        if params.is_empty() {
            format!("{}/stream/{}", self.proxy_url, token)
        } else {
            format!("{}/stream/{}?{}", self.proxy_url, token, params.join("&"))
        }
    }

    /// line-oriented rewrite. Blank lines pass through, tag lines get their
    /// URI attributes re-pointed in place, everything else is a media
    /// reference and is replaced wholesale. A reference that won't resolve
    /// against the base leaves its line untouched rather than corrupting the
    /// manifest.
    pub fn rewrite_manifest(
        &self,
        manifest: &str,
        base_url: &str,
        auth_token: &str,
        sid: &str,
    ) -> String {
        let base = url::Url::parse(base_url).ok();

        let resolve = |reference: &str| -> Option<String> {
            base.as_ref()
                .and_then(|b| b.join(reference).ok())
                .map(|u| u.to_string())
        };

        let lines: Vec<String> = manifest
            .lines()
            .map(|line| {
                let trimmed = line.trim();

                if trimmed.is_empty() {
                    return line.to_string();
                }

                if trimmed.starts_with('#') {
                    return self.rewrite_tag_line(line, auth_token, sid, &resolve);
                }

                match resolve(trimmed) {
                    Some(absolute) => self.proxied_stream_url(&absolute, auth_token, sid),
                    None => {
                        debug!("unresolvable manifest reference left as-is: {}", trimmed);
                        line.to_string()
                    }
                }
            })
            .collect();

        lines.join("\n")
    }

    fn rewrite_tag_line(
        &self,
        line: &str,
        auth_token: &str,
        sid: &str,
        resolve: &dyn Fn(&str) -> Option<String>,
    ) -> String {
        let Some(captures) = URI_ATTR_RE.captures(line) else {
            return line.to_string();
        };

        let Some(absolute) = resolve(&captures[1]) else {
            return line.to_string();
        };

        let proxied = self.proxied_stream_url(&absolute, auth_token, sid);
        let replacement = format!("URI=\"{proxied}\"");
        URI_ATTR_RE
            .replace(line, regex::NoExpand(&replacement))
            .into_owned()
    }
}
