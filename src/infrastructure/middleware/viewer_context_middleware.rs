// ViewerContext Middleware - resolves the acting user from request headers
// The identity provider authenticates upstream; by the time a request gets
// here the user id travels in `x-user-id`.

use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use std::sync::Arc;
use tracing::debug;

use crate::core::strong_types::UserId;
use crate::infrastructure::viewer::ViewerContext;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Inject `Arc<ViewerContext>` into request extensions when a user id is
/// present. Requests without one pass through; handlers that need a viewer
/// reject them at extraction.
pub async fn viewer_context_middleware(mut request: Request, next: Next) -> Response {
    if let Some(user_id) = user_id_from_headers(request.headers()) {
        let viewer = ViewerContext::new(user_id);
        debug!("viewer {} for {}", viewer, request.uri().path());
        request.extensions_mut().insert(Arc::new(viewer));
    }
    next.run(request).await
}

fn user_id_from_headers(headers: &HeaderMap) -> Option<UserId> {
    let raw = headers.get(USER_ID_HEADER)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(UserId::new(raw))
}
