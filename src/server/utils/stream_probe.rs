use once_cell::sync::Lazy;
use regex::Regex;

// same heuristics the playback side uses: the url extension decides whether a
// decrypted upstream link is a manifest, a raw transport stream or seekable video

static TS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.ts(\?|$)").expect("static regex"));

static DIRECT_VIDEO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(mp4|mkv|avi|mov|webm|m4v)(\?|$)").expect("static regex"));

pub fn is_manifest_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains(".m3u8") || lower.ends_with(".m3u")
}

pub fn is_transport_stream_url(url: &str) -> bool {
    TS_RE.is_match(url)
}

pub fn is_direct_video_url(url: &str) -> bool {
    DIRECT_VIDEO_RE.is_match(url)
}

/// manifests, segments and direct video all count against the session caps.
/// anything else (logos, subtitles, whatever a playlist drags in) relays freely
pub fn requires_admission(url: &str) -> bool {
    is_manifest_url(url) || is_transport_stream_url(url) || is_direct_video_url(url)
}
