//! Sliding-window rate limiting with a shared store and a local fallback.

mod backend;
mod clock;
mod limiter;
mod local;
mod result;
mod shared;
mod window;

pub use backend::TimestampStore;
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{RateLimiter, SharedStore};
pub use local::MemoryStore;
pub use result::RateLimitResult;
pub use shared::RedisStore;
pub use window::{SlidingWindow, DEFAULT_LIMIT, DEFAULT_WINDOW_SECS};
