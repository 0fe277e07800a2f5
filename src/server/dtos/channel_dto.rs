use serde::{Deserialize, Serialize};

/// live channel vs vod title - clients pick their player accordingly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Live,
    Movie,
}

/// playback strategy hint: hls manifests, raw mpeg-ts, or a seekable file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    Hls,
    Ts,
    Direct,
}

/// one playable item as clients see it. streamUrl is the masked, token-bearing
/// proxy link - the real upstream url never appears in this structure
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    pub name: String,
    pub tvg_id: String,
    pub tvg_logo: String,
    pub group_title: String,
    pub format: StreamFormat,
    pub stream_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelsPage {
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub channels: Vec<ChannelDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCount {
    pub title: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupsResponse {
    pub groups: Vec<GroupCount>,
}

/// raw query params for /api/channels, normalized before use.
/// offset/limit tolerate junk values (`?limit=abc` reads as unset) instead of
/// failing the whole request with a 400
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ChannelQuery {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub offset: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub limit: Option<i64>,
    pub q: Option<String>,
    pub group: Option<String>,
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.trim().parse().ok()))
}

#[derive(Debug, Clone)]
pub struct NormalizedChannelQuery {
    pub offset: usize,
    pub limit: usize,
    pub q: String,
    pub group: String,
}

impl ChannelQuery {
    pub fn normalize(&self) -> NormalizedChannelQuery {
        let offset = self.offset.unwrap_or(0).max(0) as usize;
        let limit_raw = self.limit.unwrap_or(0);
        let limit = if limit_raw <= 0 { 1000 } else { limit_raw as usize }.clamp(1, 5000);

        NormalizedChannelQuery {
            offset,
            limit,
            q: self.q.as_deref().unwrap_or("").trim().to_lowercase(),
            group: self.group.as_deref().unwrap_or("").trim().to_string(),
        }
    }
}
