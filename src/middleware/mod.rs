pub mod auth;
pub mod connection_limit;

pub use auth::{AuthId, auth_middleware, match_api_secret_id};
pub use connection_limit::{ClientIp, connection_limit_middleware};
