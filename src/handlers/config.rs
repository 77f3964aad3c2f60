use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/config`: the effective configuration. Read-only; changes
/// need a restart because the model and the job store are built at startup.
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": config.server,
            "models": config.models,
            "jobs": config.jobs,
            "storage": config.storage,
            "audio": config.audio
        }
    })))
}
