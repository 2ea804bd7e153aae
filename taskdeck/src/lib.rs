//! Client library for `TaskDeck` boards.

pub mod api;
pub mod auth;
pub mod board;
pub mod cache;
pub mod config;
pub mod mutation;
pub mod notifications;
pub mod push;
