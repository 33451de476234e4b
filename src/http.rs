// HTTP Host - JSON surface over the sync core
// Every handler acts as the viewer resolved by the viewer middleware.

use axum::{
    extract::{Path as AxumPath, Query, State},
    middleware,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::warn;

use crate::{
    app_state::AppState,
    core::strong_types::{AnimeId, MessageId, NotificationId, PostId, RoomId, UserId},
    error::{AppError, AppResult},
    infrastructure::identity::resolve_actor,
    infrastructure::middleware::{viewer_context_middleware, Vc},
    models::{
        chat::{ChatMessage, RoomStatus},
        notification::{Notification, NotificationFilter},
        post::{AnimeReference, Post, ToggleKind},
    },
    services::{
        feed_service::FeedItem,
        toggle_engine::{PostEngagement, ToggleOutcome},
    },
};

/// How long the first notification request waits for the initial snapshot
const FIRST_SNAPSHOT_WAIT: Duration = Duration::from_secs(2);

// Request/Response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub content: String,
    #[serde(default)]
    pub anime: Option<AnimeReference>,
    #[serde(default)]
    pub media_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleResponse {
    pub outcome: ToggleOutcome,
    pub engagement: Option<PostEngagement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRoomRequest {
    pub anime_id: AnimeId,
    pub episode: u32,
    /// Skip the schedule lookup when the caller already knows the time
    #[serde(default)]
    pub airing_at_epoch_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub spoiler_verified: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Deserialize)]
pub struct FilterQuery {
    pub filter: Option<NotificationFilter>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub filter: NotificationFilter,
    pub unread_count: usize,
    pub items: Vec<Notification>,
}

// Post handlers

pub async fn create_post_handler(
    State(state): State<AppState>,
    vc: Vc,
    Json(req): Json<CreatePostRequest>,
) -> AppResult<Json<Post>> {
    let post = state
        .feed
        .create_post(&vc.user_id, &req.content, req.anime, req.media_url)
        .await?;
    Ok(Json(post))
}

pub async fn get_post_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<String>,
) -> AppResult<Json<FeedItem>> {
    let post = state.feed.get_post(&PostId::new(id)).await?;
    state.engine.track_post(&post);
    let engagement = state
        .engine
        .engagement(&post.id, &vc.user_id)
        .ok_or_else(|| AppError::NotFound(format!("post {}", post.id)))?;
    Ok(Json(FeedItem { post, engagement }))
}

pub async fn reply_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<String>,
    Json(req): Json<ReplyRequest>,
) -> AppResult<Json<Post>> {
    let reply = state
        .feed
        .reply_to_post(&PostId::new(id), &vc.user_id, &req.content)
        .await?;
    Ok(Json(reply))
}

pub async fn feed_handler(
    State(state): State<AppState>,
    vc: Vc,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<Vec<FeedItem>>> {
    let limit = params.limit.unwrap_or(state.config.sync.feed_page_size);
    Ok(Json(state.feed.load_feed(&vc.user_id, limit).await?))
}

async fn toggle(
    state: &AppState,
    vc: &Vc,
    id: String,
    kind: ToggleKind,
    desired: bool,
) -> AppResult<Json<ToggleResponse>> {
    let post_id = PostId::new(id);
    if state.engine.engagement(&post_id, &vc.user_id).is_none() {
        let post = state.feed.get_post(&post_id).await?;
        state.engine.track_post(&post);
    }
    let outcome = state
        .engine
        .apply_toggle(&post_id, &vc.user_id, kind, desired)
        .await?;
    Ok(Json(ToggleResponse {
        outcome,
        engagement: state.engine.engagement(&post_id, &vc.user_id),
    }))
}

pub async fn like_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<String>,
) -> AppResult<Json<ToggleResponse>> {
    toggle(&state, &vc, id, ToggleKind::Like, true).await
}

pub async fn unlike_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<String>,
) -> AppResult<Json<ToggleResponse>> {
    toggle(&state, &vc, id, ToggleKind::Like, false).await
}

pub async fn repost_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<String>,
) -> AppResult<Json<ToggleResponse>> {
    toggle(&state, &vc, id, ToggleKind::Repost, true).await
}

pub async fn unrepost_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<String>,
) -> AppResult<Json<ToggleResponse>> {
    toggle(&state, &vc, id, ToggleKind::Repost, false).await
}

pub async fn follow_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<String>,
) -> AppResult<Json<Value>> {
    let followee = UserId::new(id);
    let actor = resolve_actor(state.feed.identity(), &vc.user_id).await;
    let notification = state.notifications.notify_follow(actor, &followee).await?;
    Ok(Json(json!({
        "followee": followee,
        "notified": notification.is_some(),
    })))
}

// Room handlers

pub async fn open_room_handler(
    State(state): State<AppState>,
    Json(req): Json<OpenRoomRequest>,
) -> AppResult<Json<RoomStatus>> {
    let room = match req.airing_at_epoch_seconds {
        Some(airing_at) => {
            state
                .chat
                .get_or_create_room(req.anime_id, req.episode, airing_at)
                .await?
        }
        None => state.chat.open_episode_room(req.anime_id, req.episode).await?,
    };
    Ok(Json(room.status(state.clock.as_ref())))
}

pub async fn room_status_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> AppResult<Json<RoomStatus>> {
    Ok(Json(state.chat.room_status(&RoomId::new(id)).await?))
}

pub async fn join_room_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<String>,
) -> AppResult<Json<Value>> {
    let room_id = RoomId::new(id);
    state.chat.get_room(&room_id).await?;
    let joined = state.chat.join_room(&room_id, &vc.user_id).await?;
    Ok(Json(json!({ "roomId": room_id, "joined": joined })))
}

pub async fn list_messages_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    let messages = state
        .chat
        .recent_messages(&RoomId::new(id), params.limit)
        .await?;
    Ok(Json(messages))
}

pub async fn send_message_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<String>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<Json<ChatMessage>> {
    let message = state
        .chat
        .send_message(&RoomId::new(id), &vc.user_id, &req.content, req.spoiler_verified)
        .await?;
    Ok(Json(message))
}

pub async fn reaction_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath((room_id, message_id)): AxumPath<(String, String)>,
    Json(req): Json<ReactionRequest>,
) -> AppResult<Json<ChatMessage>> {
    let message = state
        .chat
        .add_reaction(
            &RoomId::new(room_id),
            &MessageId::new(message_id),
            &req.emoji,
            &vc.user_id,
        )
        .await?;
    Ok(Json(message))
}

pub async fn verify_spoiler_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<String>,
) -> AppResult<Json<Value>> {
    let room_id = RoomId::new(id);
    let created = state
        .chat
        .ledger()
        .verify_spoiler_access(&room_id, &vc.user_id)
        .await?;
    Ok(Json(json!({ "roomId": room_id, "verified": true, "created": created })))
}

pub async fn spoiler_access_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<String>,
) -> AppResult<Json<Value>> {
    let room_id = RoomId::new(id);
    let verified = state
        .chat
        .ledger()
        .has_spoiler_access(&room_id, &vc.user_id)
        .await?;
    Ok(Json(json!({ "roomId": room_id, "verified": verified })))
}

// Notification handlers

pub async fn notifications_handler(
    State(state): State<AppState>,
    vc: Vc,
    Query(params): Query<FilterQuery>,
) -> AppResult<Json<NotificationView>> {
    let center = state.notification_center(&vc.user_id).await;
    if !center.is_subscribed(&vc.user_id).await {
        let (tx, rx) = oneshot::channel();
        let mut first = Some(tx);
        let user = vc.user_id.clone();
        let _handle = center
            .subscribe(
                &vc.user_id,
                move |_| {
                    if let Some(tx) = first.take() {
                        let _ = tx.send(());
                    }
                },
                move |error| warn!("Notification feed for {} failed: {}", user, error),
            )
            .await?;
        if tokio::time::timeout(FIRST_SNAPSHOT_WAIT, rx).await.is_err() {
            warn!("No notification snapshot for {} yet", vc.user_id);
        }
    }

    let items = match params.filter {
        Some(filter) => center.set_filter(filter),
        None => center.filtered_view(),
    };
    Ok(Json(NotificationView {
        filter: center.current_filter(),
        unread_count: center.unread_count(),
        items,
    }))
}

pub async fn mark_read_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(id): AxumPath<String>,
) -> AppResult<Json<Value>> {
    let center = state.notification_center(&vc.user_id).await;
    center.mark_as_read(&NotificationId::new(id.clone())).await;
    Ok(Json(json!({ "id": id, "unreadCount": center.unread_count() })))
}

pub async fn mark_all_read_handler(
    State(state): State<AppState>,
    vc: Vc,
) -> AppResult<Json<Value>> {
    let center = state.notification_center(&vc.user_id).await;
    let changed = center.mark_all_as_read(&vc.user_id).await?;
    Ok(Json(json!({ "marked": changed, "unreadCount": center.unread_count() })))
}

/// Session end: stops the live notification query for the viewer
pub async fn end_notification_session_handler(
    State(state): State<AppState>,
    vc: Vc,
) -> AppResult<Json<Value>> {
    let ended = state.end_notification_session(&vc.user_id).await;
    Ok(Json(json!({ "ended": ended })))
}

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// Router

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Posts & feed
        .route("/feed", get(feed_handler))
        .route("/posts", post(create_post_handler))
        .route("/posts/{id}", get(get_post_handler))
        .route("/posts/{id}/replies", post(reply_handler))
        .route("/posts/{id}/like", post(like_handler).delete(unlike_handler))
        .route("/posts/{id}/repost", post(repost_handler).delete(unrepost_handler))
        .route("/users/{id}/follow", post(follow_handler))
        // Episode rooms
        .route("/rooms", post(open_room_handler))
        .route("/rooms/{id}", get(room_status_handler))
        .route("/rooms/{id}/join", post(join_room_handler))
        .route(
            "/rooms/{id}/messages",
            get(list_messages_handler).post(send_message_handler),
        )
        .route(
            "/rooms/{id}/messages/{message_id}/reactions",
            post(reaction_handler),
        )
        .route(
            "/rooms/{id}/spoiler-access",
            get(spoiler_access_handler).post(verify_spoiler_handler),
        )
        // Notifications
        .route("/notifications", get(notifications_handler))
        .route("/notifications/read-all", post(mark_all_read_handler))
        .route(
            "/notifications/subscription",
            delete(end_notification_session_handler),
        )
        .route("/notifications/{id}/read", post(mark_read_handler))
        .layer(middleware::from_fn(viewer_context_middleware))
        .with_state(state)
}
