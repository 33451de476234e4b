// Viewer Context - who is acting on this request
// Built once per request by the viewer middleware; handlers and services
// only ever see this, never raw headers.

use std::fmt;
use uuid::Uuid;

use crate::core::strong_types::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerContext {
    pub request_id: Uuid,
    pub user_id: UserId,
}

impl ViewerContext {
    pub fn new(user_id: UserId) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id,
        }
    }
}

impl fmt::Display for ViewerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.user_id, self.request_id)
    }
}
