//! # Job Endpoints
//!
//! - `POST /start_transcribe/` (and `POST /api/v1/jobs`): multipart upload
//!   with the media in the `file` field. Answers `{"job_id": "..."}` as soon
//!   as the job is queued.
//! - `GET /status/{job_id}/` (and `GET /api/v1/jobs/{job_id}`): the job's
//!   current record, verbatim.
//!
//! The upload is streamed straight into a scratch file; nothing but the
//! `queued` record is written before the response goes out.

use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::jobs::JobId;
use crate::pipeline::{UploadWriter, UploadedArtifact};
use crate::state::AppState;

pub const UPLOAD_FIELD: &str = "file";

const MISSING_FILE: &str = "Método inválido ou ficheiro em falta";
const JOB_NOT_FOUND: &str = "Job não encontrado";

pub async fn start_transcribe(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let mut upload = None;

    while let Some(mut field) = payload.try_next().await? {
        if upload.is_none() && field.name() == Some(UPLOAD_FIELD) {
            upload = Some(receive_upload(&state, &mut field).await?);
        } else {
            // other form fields are read and discarded
            while field.try_next().await?.is_some() {}
        }
    }

    let upload = upload.ok_or_else(|| AppError::BadRequest(MISSING_FILE.to_string()))?;
    if upload.size() == 0 {
        return Err(AppError::BadRequest(format!(
            "{}: o ficheiro está vazio",
            MISSING_FILE
        )));
    }

    let job_id = state.dispatcher.submit(upload).map_err(|e| {
        warn!(error = %e, "Failed to register job");
        AppError::Internal(format!("Erro a registar o job: {}", e))
    })?;

    info!(job_id = %job_id, "Transcription job accepted");
    Ok(HttpResponse::Ok().json(json!({ "job_id": job_id.as_str() })))
}

async fn receive_upload(state: &AppState, field: &mut Field) -> AppResult<UploadedArtifact> {
    let config = state.get_config();
    let limit = config.max_upload_bytes() as u64;

    let file_name = field
        .content_disposition()
        .and_then(|cd| cd.get_filename())
        .map(str::to_string)
        .unwrap_or_default();
    let scratch_dir = config.scratch_dir();
    let mut writer = UploadWriter::create(&scratch_dir, &file_name)?;

    while let Some(chunk) = field.try_next().await? {
        if writer.size() + chunk.len() as u64 > limit {
            // dropping the writer deletes the partial file
            return Err(AppError::PayloadTooLarge(format!(
                "O ficheiro excede o limite de {} MB",
                config.server.max_upload_mb
            )));
        }
        writer.write_chunk(&chunk).await?;
    }

    debug!(file = %file_name, bytes = writer.size(), "Upload received");
    Ok(writer.finish().await?)
}

pub async fn job_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let job_id = JobId::parse(&path.into_inner())
        .ok_or_else(|| AppError::NotFound(JOB_NOT_FOUND.to_string()))?;

    match state.dispatcher.status(&job_id)? {
        Some(job_state) => Ok(HttpResponse::Ok().json(job_state)),
        None => Err(AppError::NotFound(JOB_NOT_FOUND.to_string())),
    }
}

/// Any non-POST request to the submission route.
pub async fn invalid_method() -> AppResult<HttpResponse> {
    Err(AppError::BadRequest(MISSING_FILE.to_string()))
}
