pub mod api;
pub mod core;
pub mod dispatch;
pub mod engine;
pub mod storage;
pub mod watcher;

pub use engine::Engine;
