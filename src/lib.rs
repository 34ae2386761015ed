pub mod app;
pub mod config;
pub mod failure;
pub mod item;
pub mod media;
pub mod orchestration;
pub mod provider;
pub mod shared;
