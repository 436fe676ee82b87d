use crate::AppState;
use crate::api::error::AppError;
use crate::models::UploadedFile;
use crate::services::upload_pipeline;
use axum::{
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};
use bytes::BytesMut;

fn multipart_error(e: MultipartError) -> AppError {
    let err_msg = e.to_string();
    if err_msg.contains("length limit exceeded") {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(err_msg)
    }
}

#[utoipa::path(
    post,
    path = "/file-upload",
    request_body(content = Multipart, description = "Complaint attachment in the `file` field"),
    responses(
        (status = 204, description = "Upload accepted"),
        (status = 400, description = "Malformed multipart body"),
        (status = 410, description = "B2B XML complaints are deprecated"),
        (status = 413, description = "File exceeds the upload limit"),
        (status = 503, description = "XML processing exhausted its time budget")
    ),
    tag = "complaints"
)]
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<StatusCode, AppError> {
    let max_size = state.config.max_upload_size;
    let mut file: Option<UploadedFile> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        // only parts carrying a filename are files
        let Some(original_name) = field.file_name().map(|n| n.to_string()) else {
            continue;
        };
        if file.is_some() {
            return Err(AppError::BadRequest("Unexpected field: file".to_string()));
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if buffer.len() + chunk.len() > max_size {
                return Err(AppError::PayloadTooLarge(format!(
                    "File too large (max {} bytes)",
                    max_size
                )));
            }
            buffer.extend_from_slice(&chunk);
        }

        file = Some(UploadedFile::new(original_name, buffer.freeze()));
    }

    upload_pipeline::run(&state, file).await
}
