pub mod backend;
pub mod chat;
pub mod config;
pub mod database;
pub mod directory;
pub mod logging;
pub mod memory;
pub mod message_list;
pub mod model;
pub mod push;
pub mod relay;
pub mod server;
pub mod session;
pub mod storage;
pub mod user_list;
