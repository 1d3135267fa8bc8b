pub mod config;
pub mod connection;
pub mod contracts;
pub mod conversations;
pub mod database;
pub mod jobs;
pub mod messages;
pub mod moderation;
pub mod users;
