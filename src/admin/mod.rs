//! HTTP admin surface: health, inspection and manual control.

mod api;
mod auth;
mod rate_limit;
mod server;

pub use api::AdminApi;
pub use auth::BearerAuth;
pub use rate_limit::RateLimiter;
pub use server::AdminServer;
