/// Per-identity token bucket rate limiting
pub mod profiles;
pub mod registry;
pub mod token_bucket;

pub use profiles::{LimitSettings, RateLimitSettings, RateLimits};
pub use registry::LimiterRegistry;
pub use token_bucket::{Admission, TokenBucket};
