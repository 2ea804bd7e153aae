//! Shared data model and push-channel protocol for `TaskDeck`.

pub mod event;
pub mod notification;
pub mod project;
pub mod task;
pub mod user;
pub mod validate;
