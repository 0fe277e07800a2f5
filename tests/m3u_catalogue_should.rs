use std::sync::Arc;

use relay::config::CargoEnv;
use relay::server::dtos::channel_dto::{ChannelKind, ChannelQuery, StreamFormat};
use relay::server::services::catalogue_services::{
    CatalogueServiceTrait, M3uCatalogueService, PlaylistSource, parse_channels_from_m3u,
};
use relay::server::services::url_cipher_services::UrlCipher;

const PROXY: &str = "http://proxy.local:3001";

const PLAYLIST: &str = r#"#EXTM3U
#EXTINF:-1 tvg-id="one.uk" tvg-logo="http://logo/1.png" group-title="News",Channel One
http://origin/live/1.m3u8
#EXTINF:-1 tvg-id="two.uk" group-title="News",Channel Two
http://origin/live/2.ts
#EXTINF:-1 group-title="Sports",Channel Three
http://origin/live/3.m3u8
#EXTINF:-1,Movie Night
http://origin/vod/movie.mp4
# a stray comment between entries
#EXTINF:-1 group-title="Sports",Channel Five
http://origin/live/5.m3u8
"#;

fn cipher() -> Arc<UrlCipher> {
    Arc::new(
        UrlCipher::from_secret(Some("test_secret"), CargoEnv::Development)
            .expect("cipher construction"),
    )
}

fn write_playlist(name: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("relay-test-{}-{}.m3u", std::process::id(), name));
    std::fs::write(&path, PLAYLIST).expect("write playlist fixture");
    path
}

fn service(path: std::path::PathBuf) -> M3uCatalogueService {
    M3uCatalogueService::new(
        reqwest::Client::new(),
        cipher(),
        PROXY,
        PlaylistSource::File(path),
    )
}

#[test]
fn test_parses_extinf_attributes() {
    let channels = parse_channels_from_m3u(PLAYLIST);
    assert_eq!(channels.len(), 5);

    let first = &channels[0];
    assert_eq!(first.name, "Channel One");
    assert_eq!(first.tvg_id, "one.uk");
    assert_eq!(first.tvg_logo, "http://logo/1.png");
    assert_eq!(first.group_title, "News");
    assert_eq!(first.kind, ChannelKind::Live);
    assert_eq!(first.format, StreamFormat::Hls);
    assert_eq!(first.original_url, "http://origin/live/1.m3u8");

    // missing attributes get safe defaults
    let fourth = &channels[3];
    assert_eq!(fourth.name, "Movie Night");
    assert_eq!(fourth.tvg_id, "");
    assert_eq!(fourth.group_title, "General");
    assert_eq!(fourth.format, StreamFormat::Direct);

    assert_eq!(channels[1].format, StreamFormat::Ts);
}

#[test]
fn test_skips_extinf_without_a_url_line() {
    let channels = parse_channels_from_m3u(
        "#EXTM3U\n#EXTINF:-1,Broken Entry\n#EXTINF:-1,Good Entry\nhttp://origin/live/ok.m3u8",
    );
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].name, "Good Entry");
}

#[tokio::test]
async fn test_masked_playlist_hides_every_upstream_url() {
    let path = write_playlist("masked");
    let catalogue = service(path.clone());

    let masked = catalogue.masked_playlist("jwt").await.expect("masked playlist");

    assert!(!masked.contains("origin"));
    // structure survives: same extinf lines, same count of stream links
    assert!(masked.contains("#EXTINF:-1 tvg-id=\"one.uk\""));
    assert!(masked.contains("# a stray comment between entries"));
    let proxied = masked
        .lines()
        .filter(|l| l.starts_with(&format!("{PROXY}/stream/")))
        .count();
    assert_eq!(proxied, 5);

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn test_channels_page_paginates_and_masks() {
    let path = write_playlist("page");
    let catalogue = service(path.clone());

    let query = ChannelQuery {
        offset: Some(1),
        limit: Some(2),
        ..Default::default()
    };
    let page = catalogue.channels_page("jwt", &query).await.expect("page");

    assert_eq!(page.total, 5);
    assert_eq!(page.offset, 1);
    assert_eq!(page.limit, 2);
    assert_eq!(page.channels.len(), 2);
    assert_eq!(page.channels[0].name, "Channel Two");
    for channel in &page.channels {
        assert!(channel.stream_url.starts_with(&format!("{PROXY}/stream/")));
        assert!(!channel.stream_url.contains("origin"));
    }

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn test_channels_page_filters_by_group_and_search() {
    let path = write_playlist("filter");
    let catalogue = service(path.clone());

    let by_group = catalogue
        .channels_page(
            "jwt",
            &ChannelQuery {
                group: Some("Sports".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("group filter");
    assert_eq!(by_group.total, 2);

    // search is case-insensitive over name and group
    let by_search = catalogue
        .channels_page(
            "jwt",
            &ChannelQuery {
                q: Some("THREE".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("search filter");
    assert_eq!(by_search.total, 1);
    assert_eq!(by_search.channels[0].name, "Channel Three");

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn test_groups_are_counted_and_sorted() {
    let path = write_playlist("groups");
    let catalogue = service(path.clone());

    let groups = catalogue.channel_groups().await.expect("groups");

    let titles: Vec<&str> = groups.iter().map(|g| g.title.as_str()).collect();
    assert_eq!(titles, vec!["General", "News", "Sports"]);
    let news = groups.iter().find(|g| g.title == "News").expect("news group");
    assert_eq!(news.count, 2);

    std::fs::remove_file(path).ok();
}
