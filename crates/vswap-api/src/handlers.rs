//! Request handlers.

pub mod account;
pub mod admin;
pub mod exchanges;
pub mod health;
pub mod moderation;
pub mod notifications;
pub mod quota;
pub mod subscription;
pub mod videos;

pub use account::*;
pub use admin::*;
pub use exchanges::*;
pub use health::*;
pub use moderation::*;
pub use notifications::*;
pub use quota::*;
pub use subscription::*;
pub use videos::*;
