pub mod cache;
pub mod identity;
pub mod timing;

pub use cache::ResponseCache;
pub use timing::{StageGuard, StageTracker};
