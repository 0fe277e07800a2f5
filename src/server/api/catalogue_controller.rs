use axum::{
    Json, Router,
    extract::Query,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::error;

use crate::server::dtos::channel_dto::{ChannelQuery, ChannelsPage, GroupsResponse};
use crate::server::error::AppResult;
use crate::server::extractors::RelayAuthentication;

pub struct CatalogueController;

impl CatalogueController {
    pub fn app() -> Router {
        Router::new()
            .route("/playlist.m3u", get(Self::masked_playlist))
            .route("/api/channels", get(Self::channels))
            .route("/api/channels/groups", get(Self::groups))
    }

    /// the full masked manifest - what a player loads as its "playlist".
    /// listing never consumes a playback slot, admission only happens on
    /// actual stream fetches
    async fn masked_playlist(
        RelayAuthentication(user, services): RelayAuthentication,
    ) -> AppResult<Response> {
        let masked = services
            .catalogue
            .masked_playlist(&user.token)
            .await
            .inspect_err(|e| error!("masked playlist failed: {}", e))?;

        Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/x-mpegURL"),
                (header::CACHE_CONTROL, "private, max-age=3600"),
            ],
            masked,
        )
            .into_response())
    }

    async fn channels(
        RelayAuthentication(user, services): RelayAuthentication,
        Query(query): Query<ChannelQuery>,
    ) -> AppResult<Json<ChannelsPage>> {
        let page = services
            .catalogue
            .channels_page(&user.token, &query)
            .await
            .inspect_err(|e| error!("channel listing failed: {}", e))?;
        Ok(Json(page))
    }

    async fn groups(
        RelayAuthentication(_user, services): RelayAuthentication,
    ) -> AppResult<Json<GroupsResponse>> {
        let groups = services
            .catalogue
            .channel_groups()
            .await
            .inspect_err(|e| error!("group listing failed: {}", e))?;
        Ok(Json(GroupsResponse { groups }))
    }
}
