pub mod blocker;
pub mod challenge;
pub mod rate_limiter;

pub use blocker::Blocker;
pub use challenge::ChallengeManager;
pub use rate_limiter::RateLimiter;
