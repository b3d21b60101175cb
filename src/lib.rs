pub mod chat;
pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod storage;
pub mod ui;
