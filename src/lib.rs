//! Incident bot: Telegram intake for support incidents, forwarded by email.

pub mod agent;
pub mod attachments;
pub mod channels;
pub mod config;
pub mod conversation;
pub mod error;
pub mod mail;
