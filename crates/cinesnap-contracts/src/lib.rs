pub mod chat;
pub mod events;
pub mod history;
pub mod prompt;
pub mod storage;
