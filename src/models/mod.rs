// Domain models persisted through the document store

pub mod chat;
pub mod notification;
pub mod post;

pub use chat::{ChatMessage, ChatRoom, Reaction, RoomStatus, SpoilerVerification};
pub use notification::{
    Actor, NewNotification, Notification, NotificationEvent, NotificationFilter, NotificationType,
};
pub use post::{AnimeReference, LikeRecord, NewPost, Post, PresenceRecord, RepostRecord, ToggleKind};
