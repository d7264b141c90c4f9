// Logging, compression and CORS for the API server

use actix_web::middleware::{Compress, Logger};

pub fn setup_middleware() -> (Logger, Compress) {
    let logger = Logger::default();
    let compress = Compress::default();
    (logger, compress)
}

use actix_cors::Cors;
use actix_web::http::header;

/// The API is read-only, so only GET (and the preflight) is allowed cross-origin.
pub fn setup_cors(allowed_origins: &str) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET"])
        .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
        .expose_headers(vec![
            "X-Total-Count",
            "X-Current-Page",
            "X-Total-Pages",
            "X-Page-Size",
        ])
        .max_age(3600);

    for origin in allowed_origins.split(',').map(str::trim) {
        if origin == "*" {
            cors = cors.allow_any_origin();
        } else if !origin.is_empty() {
            cors = cors.allowed_origin(origin);
        }
    }

    cors
}
