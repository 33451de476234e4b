// ViewerContext Extractor - handler-side access to the request's viewer

use axum::{extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;

use crate::error::AppError;
use crate::infrastructure::viewer::ViewerContext;

/// Cheap-to-clone handle on the request's `ViewerContext`.
///
/// Derefs to the context, so handlers read `vc.user_id` directly.
#[derive(Debug, Clone)]
pub struct Vc(Arc<ViewerContext>);

impl Vc {
    pub fn new(vc: Arc<ViewerContext>) -> Self {
        Self(vc)
    }

    pub fn arc(self) -> Arc<ViewerContext> {
        self.0
    }
}

impl std::ops::Deref for Vc {
    type Target = ViewerContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S> FromRequestParts<S> for Vc
where
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let vc = parts
            .extensions
            .get::<Arc<ViewerContext>>()
            .map(|vc| Vc(Arc::clone(vc)))
            .ok_or_else(|| AppError::Unauthorized("missing viewer".to_string()));

        async move { vc }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::strong_types::UserId;
    use axum::http::Request;

    #[tokio::test]
    async fn test_extracts_injected_viewer() {
        let mut request = Request::builder().uri("/").body(()).unwrap();
        let viewer = Arc::new(ViewerContext::new(UserId::new("alice")));
        request.extensions_mut().insert(Arc::clone(&viewer));
        let (mut parts, _) = request.into_parts();

        let vc = Vc::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(vc.user_id, UserId::new("alice"));
        assert_eq!(vc.arc().request_id, viewer.request_id);
    }

    #[tokio::test]
    async fn test_missing_viewer_is_unauthorized() {
        let (mut parts, _) = Request::builder().uri("/").body(()).unwrap().into_parts();
        let err = Vc::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
