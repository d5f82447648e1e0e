// src/api/handlers.rs
use crate::error::EngineError;
use crate::models::cdr::Cdr;
use crate::models::HealthResponse;
use crate::services::CdrServer;
use actix_web::{web, HttpResponse};
use std::sync::Arc;

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: "charon-charging-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Form-encoded CDR ingest; field names match the canonical CDR form
/// projection.
pub async fn cdr_post(
    form: web::Form<Vec<(String, String)>>,
    cdr_server: web::Data<Arc<CdrServer>>,
) -> Result<HttpResponse, EngineError> {
    let pairs = form.into_inner();
    let cdr = Cdr::from_http_form(&pairs)?;
    cdr_server.process_cdr(&cdr).await?;
    Ok(HttpResponse::Ok().content_type("text/plain").body("OK"))
}
