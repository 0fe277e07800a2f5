pub mod stream_probe;
pub mod upstream_allowlist;
