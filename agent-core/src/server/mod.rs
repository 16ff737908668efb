//! The admin HTTP surface (C13): a small actix-web application exposing the
//! routes the warehouse container's scheduler and the UI call back into
//! (`healthcheck`, `health`, `reachability`, `metrics`, `query_completed`,
//! `query_failed`) plus the ambient admin routes every service in this stack
//! carries (`/__heartbeat__`, `/__lbheartbeat__`, `/__version__`).

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer};
use serde::Deserialize;

use crate::error::AgentResult;
use crate::sna::SnaService;

pub struct AppState {
    pub service: Arc<SnaService>,
}

async fn healthcheck() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

/// Unauthenticated internal liveness probe used by the container
/// orchestrator, distinct from `/api/v1/test/healthcheck`'s warehouse
/// contract.
async fn lbheartbeat() -> HttpResponse {
    HttpResponse::Ok().finish()
}

async fn heartbeat() -> HttpResponse {
    HttpResponse::Ok().finish()
}

async fn version() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn test_health_wrapped() -> HttpResponse {
    let health = SnaService::health_information();
    HttpResponse::Ok().json(serde_json::json!({"data": [[0, health]]}))
}

/// Raw health JSON, unwrapped, for local debugging against the same path
/// used by the warehouse's `equals /api/v1/test/health` route.
async fn test_health_raw() -> HttpResponse {
    HttpResponse::Ok().json(SnaService::health_information())
}

async fn test_reachability(state: web::Data<AppState>) -> HttpResponse {
    let result = state.service.run_reachability_test();
    HttpResponse::Ok().json(serde_json::json!({"data": [[0, result]]}))
}

async fn test_metrics(state: web::Data<AppState>) -> HttpResponse {
    let lines = state.service.scrape_metrics();
    HttpResponse::Ok().json(serde_json::json!({"data": [[0, {"metrics": lines}]]}))
}

#[derive(Debug, Deserialize)]
struct QueryCompletedBody {
    data: Vec<Vec<serde_json::Value>>,
}

/// The warehouse's stored-procedure callback shape:
/// `{data: [[0, op_json, query_id]]}`. Row 0 is discarded. An empty `data`
/// array does nothing and answers `{}` rather than the usual ack shape.
async fn query_completed(state: web::Data<AppState>, body: web::Json<QueryCompletedBody>) -> HttpResponse {
    let Some(row) = body.data.first() else {
        return HttpResponse::Ok().json(serde_json::json!({}));
    };
    if let (Some(op_json), Some(query_id)) =
        (row.get(1).and_then(|v| v.as_str()), row.get(2).and_then(|v| v.as_str()))
    {
        state.service.query_completed(op_json, query_id);
    }
    HttpResponse::Ok().json(serde_json::json!({"data": [[0, "ok"]]}))
}

#[derive(Debug, Deserialize)]
struct QueryFailedBody {
    data: Vec<Vec<serde_json::Value>>,
}

/// `{data: [[0, op_json, code, msg?, state?]]}`. Row 0 is discarded. An empty
/// `data` array does nothing and answers `{}` rather than the usual ack shape.
async fn query_failed(state: web::Data<AppState>, body: web::Json<QueryFailedBody>) -> HttpResponse {
    let Some(row) = body.data.first() else {
        return HttpResponse::Ok().json(serde_json::json!({}));
    };
    if let Some(op_json) = row.get(1).and_then(|v| v.as_str()) {
        let code = row.get(2).and_then(|v| v.as_i64()).unwrap_or(0) as i32;
        let message = row.get(3).and_then(|v| v.as_str()).unwrap_or_default();
        let state_str = row.get(4).and_then(|v| v.as_str()).unwrap_or_default();
        state.service.query_failed(op_json, code, message, state_str);
    }
    HttpResponse::Ok().json(serde_json::json!({"data": [[0, "ok"]]}))
}

pub async fn run(host: &str, port: u16, service: Arc<SnaService>) -> AgentResult<()> {
    let state = web::Data::new(AppState { service });

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .app_data(state.clone())
            .route("/__heartbeat__", web::get().to(heartbeat))
            .route("/__lbheartbeat__", web::get().to(lbheartbeat))
            .route("/__version__", web::get().to(version))
            .route("/api/v1/test/healthcheck", web::get().to(healthcheck))
            .route("/api/v1/test/health", web::post().to(test_health_wrapped))
            .route("/api/v1/test/health", web::get().to(test_health_raw))
            .route("/api/v1/test/reachability", web::post().to(test_reachability))
            .route("/api/v1/test/metrics", web::post().to(test_metrics))
            .route(
                "/api/v1/agent/execute/snowflake/query_completed",
                web::post().to(query_completed),
            )
            .route(
                "/api/v1/agent/execute/snowflake/query_failed",
                web::post().to(query_failed),
            )
    })
    .bind((host, port))?
    .run()
    .await?;

    Ok(())
}
