mod events;
mod middleware;
mod proxy;

pub use events::{AdminState, build_admin_router};
pub use middleware::RequestId;
pub use proxy::{OriginProxy, ProxyError, origin_router};

use axum::{Router, middleware as axum_middleware};

use crate::cache::{CacheState, response_cache_layer};

use self::middleware::{log_responses, set_request_context};

/// Public listener: the page cache wrapped around `origin`.
pub fn build_public_router(origin: Router, cache: Option<CacheState>) -> Router {
    let routes = match cache {
        Some(cache_state) => origin.layer(axum_middleware::from_fn_with_state(
            cache_state,
            response_cache_layer,
        )),
        None => origin,
    };

    routes
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
