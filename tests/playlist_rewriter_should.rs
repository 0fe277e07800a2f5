use std::sync::Arc;

use relay::config::CargoEnv;
use relay::server::services::playlist_rewriter_services::PlaylistRewriter;
use relay::server::services::url_cipher_services::UrlCipher;

const PROXY: &str = "http://proxy.local:3001";

fn rewriter() -> (Arc<UrlCipher>, PlaylistRewriter) {
    let cipher = Arc::new(
        UrlCipher::from_secret(Some("test_secret"), CargoEnv::Development)
            .expect("cipher construction"),
    );
    let rewriter = PlaylistRewriter::new(cipher.clone(), PROXY);
    (cipher, rewriter)
}

/// pulls the upstream url back out of a `{proxy}/stream/{token}?...` link
fn unmask(cipher: &UrlCipher, proxied: &str) -> String {
    let prefix = format!("{PROXY}/stream/");
    let rest = proxied
        .strip_prefix(&prefix)
        .unwrap_or_else(|| panic!("not a proxied link: {proxied}"));
    let token = rest.split('?').next().expect("token segment");
    cipher.decrypt_token(token).expect("token decrypts")
}

#[test]
fn test_rewrites_relative_segments_to_absolute_proxied_links() {
    let (cipher, rewriter) = rewriter();

    let manifest = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\nseg1.ts\n#EXTINF:6.0,\nseg2.ts";
    let rewritten = rewriter.rewrite_manifest(manifest, "http://origin/live/index.m3u8", "jwt", "s1");

    let lines: Vec<&str> = rewritten.lines().collect();
    assert_eq!(lines[0], "#EXTM3U");
    assert_eq!(lines[1], "#EXT-X-TARGETDURATION:6");

    assert!(lines[3].starts_with(&format!("{PROXY}/stream/")));
    assert_eq!(unmask(&cipher, lines[3]), "http://origin/live/seg1.ts");
    assert_eq!(unmask(&cipher, lines[5]), "http://origin/live/seg2.ts");

    // the upstream host never appears in the rewritten document
    assert!(!rewritten.contains("origin"));
}

#[test]
fn test_rewrites_absolute_references_too() {
    let (cipher, rewriter) = rewriter();

    let manifest = "#EXTM3U\n#EXTINF:6.0,\nhttp://cdn.other/live/seg1.ts";
    let rewritten = rewriter.rewrite_manifest(manifest, "http://origin/live/index.m3u8", "", "");

    let last = rewritten.lines().last().expect("segment line");
    assert_eq!(unmask(&cipher, last), "http://cdn.other/live/seg1.ts");
}

#[test]
fn test_rewrites_uri_attributes_in_tags() {
    let (cipher, rewriter) = rewriter();

    let manifest = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x1234\n#EXTINF:6.0,\nseg1.ts";
    let rewritten = rewriter.rewrite_manifest(manifest, "http://origin/live/index.m3u8", "jwt", "s1");

    let key_line = rewritten
        .lines()
        .find(|l| l.starts_with("#EXT-X-KEY"))
        .expect("key line survives");

    // everything around the URI attribute is intact
    assert!(key_line.starts_with("#EXT-X-KEY:METHOD=AES-128,URI=\""));
    assert!(key_line.ends_with("\",IV=0x1234"));

    let uri = key_line
        .split("URI=\"")
        .nth(1)
        .and_then(|s| s.split('"').next())
        .expect("uri value");
    assert_eq!(unmask(&cipher, uri), "http://origin/live/key.bin");
}

#[test]
fn test_leaves_plain_tags_and_blank_lines_alone() {
    let (_, rewriter) = rewriter();

    let manifest = "#EXTM3U\n\n#EXT-X-VERSION:3\n#EXT-X-ENDLIST";
    let rewritten = rewriter.rewrite_manifest(manifest, "http://origin/live/index.m3u8", "jwt", "s1");

    assert_eq!(rewritten, manifest);
}

#[test]
fn test_master_playlist_variants_route_through_the_proxy() {
    let (cipher, rewriter) = rewriter();

    let manifest = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nlow/index.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=2500000\nhigh/index.m3u8";
    let rewritten = rewriter.rewrite_manifest(manifest, "http://origin/live/master.m3u8", "jwt", "s1");

    let variants: Vec<&str> = rewritten
        .lines()
        .filter(|l| !l.starts_with('#'))
        .collect();
    assert_eq!(variants.len(), 2);
    assert_eq!(unmask(&cipher, variants[0]), "http://origin/live/low/index.m3u8");
    assert_eq!(unmask(&cipher, variants[1]), "http://origin/live/high/index.m3u8");
}

#[test]
fn test_query_params_only_when_present() {
    let (_, rewriter) = rewriter();

    let bare = rewriter.proxied_stream_url("http://origin/live/1.ts", "", "");
    assert!(!bare.contains('?'));

    let with_token = rewriter.proxied_stream_url("http://origin/live/1.ts", "jwt", "");
    assert!(with_token.contains("?token=jwt"));
    assert!(!with_token.contains("sid="));

    let with_both = rewriter.proxied_stream_url("http://origin/live/1.ts", "jwt", "s1");
    assert!(with_both.contains("token=jwt"));
    assert!(with_both.contains("sid=s1"));
}

#[test]
fn test_auth_token_is_url_encoded() {
    let (_, rewriter) = rewriter();

    // jwts carry dots, and other tokens may carry worse
    let proxied = rewriter.proxied_stream_url("http://origin/live/1.ts", "a b&c", "");
    assert!(proxied.contains("token=a%20b%26c"));
}
