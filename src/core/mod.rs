// Core types and primitives shared by every service

pub mod clock;
pub mod strong_types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use strong_types::{AnimeId, MessageId, NotificationId, PostId, RoomId, UserId};
