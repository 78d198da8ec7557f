//! Network plumbing shared by every outbound client: bounded retries with
//! exponential backoff, per-service circuit breakers, and the registry-based
//! service resolver.

pub mod breaker;
pub mod discovery;
pub mod retry;

pub use breaker::{BreakerState, CircuitBreaker, CircuitOpen};
pub use discovery::ServiceDiscovery;
pub use retry::{with_retries, RetryPolicy};
