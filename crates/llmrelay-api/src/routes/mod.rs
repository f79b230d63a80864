pub mod audio;
pub mod chat;
pub mod image;
pub mod models;
