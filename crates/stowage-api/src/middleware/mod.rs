pub mod admission;
pub mod rate_limit;

pub use admission::admission_middleware;
pub use rate_limit::{rate_limit_middleware, HttpRateLimiter};
