pub mod config;
pub mod mapper;
pub mod session;
pub mod types;
pub mod util;
pub mod wait;

pub use config::*;
pub use mapper::map_stream_click;
pub use session::{SessionInfo, SessionStats, SessionTracker};
pub use types::*;
pub use wait::{
    effective_timeout, wait_for_condition, DEFAULT_NAVIGATION_TIMEOUT_MS,
    MAX_NAVIGATION_TIMEOUT_MS,
};
