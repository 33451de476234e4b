// Identity Provider - Opaque source of the current user and profile metadata

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::core::strong_types::UserId;
use crate::error::AppResult;
use crate::models::notification::Actor;

#[async_trait]
pub trait IdentityProvider: Send + Sync + std::fmt::Debug {
    /// Display metadata for a user, if the provider knows them
    async fn profile(&self, user_id: &UserId) -> AppResult<Option<Actor>>;
}

/// In-process profile directory
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    profiles: RwLock<HashMap<UserId, Actor>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, actor: Actor) {
        self.profiles
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(actor.id.clone(), actor);
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn profile(&self, user_id: &UserId) -> AppResult<Option<Actor>> {
        Ok(self
            .profiles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned())
    }
}

/// Resolve an actor, falling back to the bare id when no profile exists
pub async fn resolve_actor(identity: &dyn IdentityProvider, user_id: &UserId) -> Actor {
    match identity.profile(user_id).await {
        Ok(Some(actor)) => actor,
        Ok(None) => Actor::anonymous(user_id.clone()),
        Err(error) => {
            tracing::warn!("Profile lookup for {} failed: {}", user_id, error);
            Actor::anonymous(user_id.clone())
        }
    }
}
