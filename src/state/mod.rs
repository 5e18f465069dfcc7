pub mod app;
pub mod listener;
pub mod redis_store;
pub mod store;

pub use app::AppState;
