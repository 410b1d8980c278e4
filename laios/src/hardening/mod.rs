//! Production hardening: circuit breaking, rate limiting, input
//! sanitization, health probes, and graceful shutdown.
//!
//! Every piece here guards a shared resource or an external effect. The
//! executor wires the breaker, limiter, and sanitizer into the tool
//! invocation path; the health checker and shutdown coordinator are
//! process-level services owned by the controller.

pub mod circuit_breaker;
pub mod health;
pub mod rate_limiter;
pub mod sanitizer;
pub mod shutdown;

pub use circuit_breaker::{BreakerStats, CircuitBreaker, CircuitState};
pub use health::{HealthCheck, HealthChecker, HealthStatus};
pub use rate_limiter::RateLimiter;
pub use sanitizer::InputSanitizer;
pub use shutdown::GracefulShutdown;
