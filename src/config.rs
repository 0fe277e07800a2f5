#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::Parser)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum)]
    pub cargo_env: CargoEnv,

    // port that the relay will bind to
    #[clap(long, env, default_value = "3001")]
    pub port: u16,

    // externally visible base URL of this proxy, used to build the masked
    // links embedded in playlists. A trailing slash gets stripped.
    #[clap(long, env, default_value = "http://localhost:3001")]
    pub proxy_url: String,

    // shared with the account backend, used to verify bearer tokens here
    #[clap(long, env)]
    pub jwt_secret: String,

    // secret the url cipher key is derived from, have it be anything secure
    // like 'openssl rand -base64 32'. Optional in development (ephemeral key,
    // tokens die on restart), required in production.
    #[clap(long, env)]
    pub encryption_key: Option<String>,

    // Xtream API source. When base url + username + password are all set the
    // Xtream catalogue is used and the playlist file/url below is ignored.
    #[clap(long, env)]
    pub xtream_base_url: Option<String>,

    #[clap(long, env)]
    pub xtream_username: Option<String>,

    #[clap(long, env)]
    pub xtream_password: Option<String>,

    // m3u8 or ts - what container the Xtream live links should ask for
    #[clap(long, env, default_value = "m3u8")]
    pub xtream_live_format: String,

    #[clap(long, env, default_value = "true", action = clap::ArgAction::Set)]
    pub xtream_include_vod: bool,

    // fallback catalogue source: a raw M3U playlist, either a local file...
    #[clap(long, env)]
    pub original_playlist_file: Option<String>,

    // ...or a URL only this proxy ever talks to
    #[clap(long, env)]
    pub original_playlist_url: Option<String>,

    // concurrent playback slots per user
    #[clap(long, env, default_value = "1")]
    pub max_streams_per_user: usize,

    // concurrent playback slots across all users, 0 disables the global cap
    #[clap(long, env, default_value = "0")]
    pub max_global_streams: usize,

    #[clap(long, env, default_value = "90")]
    pub stream_session_ttl_seconds: u64,

    #[clap(long, env, default_value = "15")]
    pub stream_session_cleanup_seconds: u64,

    #[clap(long, env, default_value = "300")]
    pub security_fail_window_seconds: u64,

    #[clap(long, env, default_value = "12")]
    pub security_max_fails: u32,

    #[clap(long, env, default_value = "900")]
    pub security_block_seconds: u64,

    #[clap(long, env, default_value = "60")]
    pub security_cleanup_seconds: u64,

    // comma separated hostnames the stream proxy may talk to, on top of the
    // hosts derived from the configured catalogue source
    #[clap(long, env)]
    pub upstream_allowlist: Option<String>,

    // turning this off means any decrypted URL gets fetched - that is an
    // explicit trust decision and gets logged loudly at startup
    #[clap(long, env, default_value = "true", action = clap::ArgAction::Set)]
    pub strict_upstream_allowlist: bool,

    // this should be either * for allowing everything, or a comma seperated list of domains like
    // example.com,something.com
    #[clap(long, env, default_value = "*")]
    pub cors_origin: String,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl Default for AppConfig {
    // defaults aren't really needed here but it's here as a bad fallback
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            port: 3001,
            proxy_url: "http://localhost:3001".to_string(),
            jwt_secret: "default-jwt-secret".to_string(),
            encryption_key: None,
            xtream_base_url: None,
            xtream_username: None,
            xtream_password: None,
            xtream_live_format: "m3u8".to_string(),
            xtream_include_vod: true,
            original_playlist_file: None,
            original_playlist_url: None,
            max_streams_per_user: 1,
            max_global_streams: 0,
            stream_session_ttl_seconds: 90,
            stream_session_cleanup_seconds: 15,
            security_fail_window_seconds: 300,
            security_max_fails: 12,
            security_block_seconds: 900,
            security_cleanup_seconds: 60,
            upstream_allowlist: None,
            strict_upstream_allowlist: true,
            cors_origin: "*".to_string(),
            sentry_dsn: None,
        }
    }
}
