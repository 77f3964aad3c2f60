//! Result documents under the media root: listing and download.

use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// `GET /api/v1/outputs`: files under the media root, newest first.
pub async fn list_outputs(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let results = state.results.clone();
    let outputs = web::block(move || results.list_outputs())
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(json!({
        "count": outputs.len(),
        "outputs": outputs
    })))
}

/// `GET /media/{filename}`: download one result document.
pub async fn download_output(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let name = path.into_inner();
    let file_path = state
        .results
        .resolve_output(&name)
        .ok_or_else(|| AppError::NotFound(format!("Ficheiro não encontrado: {}", name)))?;

    let bytes = tokio::fs::read(&file_path).await?;
    let content_type = if name.to_lowercase().ends_with(".docx") {
        DOCX_CONTENT_TYPE
    } else {
        "application/octet-stream"
    };

    Ok(HttpResponse::Ok()
        .content_type(content_type)
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(name)],
        })
        .body(bytes))
}

#[cfg(test)]
mod tests {
    use crate::handlers::configure_routes;
    use crate::state::tests::test_state;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, web, App};

    #[actix_web::test]
    async fn test_listing_and_download() {
        let scratch = tempfile::tempdir().unwrap();
        let media = tempfile::tempdir().unwrap();
        let state = test_state(scratch.path(), media.path());
        let name = state.results.publish("conteúdo").unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/outputs").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["outputs"][0]["name"], name.as_str());
        assert!(body["outputs"][0]["size_kb"].as_f64().unwrap() > 0.0);

        let req = test::TestRequest::get()
            .uri(&format!("/media/{}", name))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .contains(&name));
        let bytes = test::read_body(resp).await;
        assert_eq!(&bytes[..2], b"PK");
    }

    #[actix_web::test]
    async fn test_download_rejects_unknown_and_traversal() {
        let scratch = tempfile::tempdir().unwrap();
        let media = tempfile::tempdir().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(scratch.path(), media.path())))
                .configure(configure_routes),
        )
        .await;

        for uri in ["/media/nada.docx", "/media/..%2Fsecret", "/media/.hidden"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{}", uri);
        }
    }
}
