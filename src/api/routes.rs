// src/api/routes.rs
use crate::api::handlers;
use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/cdr_post", web::post().to(handlers::cdr_post))
        .route("/health", web::get().to(handlers::health_check));
}
