pub mod config;
pub mod jobs;
pub mod outputs;

pub use config::*;
pub use jobs::*;
pub use outputs::*;

use crate::health;
use actix_web::web;

/// Every route the service answers.
///
/// The unversioned job routes keep the paths existing clients poll
/// (`/start_transcribe/`, `/status/{job_id}/`); `/api/v1` mirrors them.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/start_transcribe/")
            .route(web::post().to(start_transcribe))
            .default_service(web::to(invalid_method)),
    )
    .route("/status/{job_id}/", web::get().to(job_status))
    .route("/media/{filename}", web::get().to(download_output))
    .route("/health", web::get().to(health::health_check))
    .service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(get_config))
            .route("/outputs", web::get().to(list_outputs))
            .route("/jobs", web::post().to(start_transcribe))
            .route("/jobs/{job_id}", web::get().to(job_status)),
    );
}
