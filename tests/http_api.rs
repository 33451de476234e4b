use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use episode_social_sync::{
    app_state::AppState,
    config::Config,
    core::{AnimeId, Clock, ManualClock},
    http::create_router,
    infrastructure::{
        AiringSchedule, IdentityProvider, InMemoryDocumentStore, StaticAiringSchedule,
        StaticIdentityProvider,
    },
};

const NOW: i64 = 1_700_000_000;

fn app() -> Router {
    app_with_store().0
}

fn app_with_store() -> (Router, Arc<InMemoryDocumentStore>) {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_epoch_seconds(NOW));
    let store = Arc::new(InMemoryDocumentStore::new(clock.clone()));
    let schedule = StaticAiringSchedule::new();
    schedule.insert(AnimeId::new(1), 4, NOW + 3600);
    let schedule: Arc<dyn AiringSchedule> = Arc::new(schedule);
    let identity: Arc<dyn IdentityProvider> = Arc::new(StaticIdentityProvider::new());
    let config = Config::from_lookup(|_| None).unwrap();
    let state = AppState::with_components(config, store.clone(), clock, schedule, identity);
    (create_router(state), store)
}

async fn call(app: &Router, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_requests_without_viewer_are_unauthorized() {
    let app = app();
    let (status, body) = call(&app, "POST", "/posts", None, Some(json!({"content": "hi"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn test_post_like_and_notification_flow() {
    let app = app();
    let (status, post) = call(
        &app,
        "POST",
        "/posts",
        Some("bob"),
        Some(json!({"content": "EP4 hype"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let post_id = post["id"].as_str().unwrap().to_string();

    let (status, liked) = call(&app, "POST", &format!("/posts/{}/like", post_id), Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(liked["outcome"], "confirmed");
    assert_eq!(liked["engagement"]["likeCount"], 1);
    assert_eq!(liked["engagement"]["liked"], true);

    let (_, again) = call(&app, "POST", &format!("/posts/{}/like", post_id), Some("alice"), None).await;
    assert_eq!(again["outcome"], "unchanged");
    assert_eq!(again["engagement"]["likeCount"], 1);

    let (status, view) = call(&app, "GET", "/notifications", Some("bob"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["unreadCount"], 1);
    assert_eq!(view["items"][0]["type"], "like");

    let (_, filtered) = call(&app, "GET", "/notifications?filter=mentions", Some("bob"), None).await;
    assert_eq!(filtered["filter"], "mentions");
    assert_eq!(filtered["items"].as_array().unwrap().len(), 0);

    let (status, marked) = call(&app, "POST", "/notifications/read-all", Some("bob"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(marked["marked"], 1);
    assert_eq!(marked["unreadCount"], 0);

    let (_, unliked) = call(&app, "DELETE", &format!("/posts/{}/like", post_id), Some("alice"), None).await;
    assert_eq!(unliked["engagement"]["likeCount"], 0);
}

#[tokio::test]
async fn test_ending_notification_session_releases_live_query() {
    let (app, store) = app_with_store();
    for user in ["bob", "carol"] {
        let (status, _) = call(&app, "GET", "/notifications", Some(user), None).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(store.active_subscriptions(), 2);

    for user in ["bob", "carol"] {
        let (status, body) = call(&app, "DELETE", "/notifications/subscription", Some(user), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ended"], true);
    }
    let (_, again) = call(&app, "DELETE", "/notifications/subscription", Some("bob"), None).await;
    assert_eq!(again["ended"], false);

    for _ in 0..100 {
        if store.active_subscriptions() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(store.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_like_on_unknown_post_is_not_found() {
    let app = app();
    let (status, body) = call(&app, "POST", "/posts/404/like", Some("alice"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_pre_air_room_rejects_unverified_messages() {
    let app = app();
    let (status, room) = call(
        &app,
        "POST",
        "/rooms",
        Some("alice"),
        Some(json!({"animeId": 1, "episode": 4})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(room["roomId"], "1_ep4");
    assert_eq!(room["isAired"], false);

    let (status, body) = call(
        &app,
        "POST",
        "/rooms/1_ep4/messages",
        Some("alice"),
        Some(json!({"content": "who wins?"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "episode_not_aired");

    let (_, granted) = call(&app, "POST", "/rooms/1_ep4/spoiler-access", Some("alice"), None).await;
    assert_eq!(granted["created"], true);

    let (status, message) = call(
        &app,
        "POST",
        "/rooms/1_ep4/messages",
        Some("alice"),
        Some(json!({"content": "screener was great"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(message["spoilerVerified"], true);

    let message_id = message["id"].as_str().unwrap().to_string();
    let uri = format!("/rooms/1_ep4/messages/{}/reactions", message_id);
    call(&app, "POST", &uri, Some("bob"), Some(json!({"emoji": "🔥"}))).await;
    let (_, reacted) = call(&app, "POST", &uri, Some("bob"), Some(json!({"emoji": "🔥"}))).await;
    assert_eq!(reacted["reactions"][0]["count"], 1);

    let (_, messages) = call(&app, "GET", "/rooms/1_ep4/messages", None, None).await;
    assert_eq!(messages.as_array().unwrap().len(), 1);

    let (_, status_body) = call(&app, "GET", "/rooms/1_ep4", None, None).await;
    assert_eq!(status_body["messageCount"], 1);
    assert_eq!(status_body["participantCount"], 1);
}

#[tokio::test]
async fn test_unknown_episode_room_is_not_found() {
    let app = app();
    let (status, _) = call(
        &app,
        "POST",
        "/rooms",
        Some("alice"),
        Some(json!({"animeId": 1, "episode": 99})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
