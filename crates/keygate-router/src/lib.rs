pub mod admin;
pub mod metrics_middleware;
pub mod proxy;
pub mod response;

pub use admin::{AdminState, admin_router};
pub use proxy::{ProxyState, proxy_router};
pub use response::ApiError;
