use crate::AppState;
use crate::api::error::AppError;
use crate::models::{Challenge, UploadedFile};
use crate::services::archive::{self, ExtractOptions, ExtractReport};
use crate::services::xml_parser::{self, XmlLimits};
use crate::utils::path;
use crate::utils::validation::{
    file_type, is_allowed_type, matches_etc_passwd_file, matches_system_ini_file, trunc,
};
use axum::http::StatusCode;
use tracing::{debug, info, warn};
use zip::result::ZipResult;

const DEPRECATED_MESSAGE: &str =
    "B2B customer complaints via file upload have been deprecated for security reasons";
const UNAVAILABLE_MESSAGE: &str = "Sorry, we are temporarily not available! Please try again later.";
const RENDERED_XML_LIMIT: usize = 400;

/// Outcome of a single pipeline step
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Done(StatusCode),
}

/// Runs the upload steps in order. The first step that finishes the request
/// decides the status; errors end the chain. A request without a file stops
/// before any step runs.
pub async fn run(state: &AppState, file: Option<UploadedFile>) -> Result<StatusCode, AppError> {
    let Some(file) = file else {
        debug!("Upload request without a file, nothing to do");
        return Ok(StatusCode::NO_CONTENT);
    };

    let result = process(state, &file).await;
    observe_upload(state, &file, &result);
    result
}

async fn process(state: &AppState, file: &UploadedFile) -> Result<StatusCode, AppError> {
    check_upload_size(state, file);
    check_file_type(state, file);

    if let Flow::Done(status) = handle_zip_file_upload(state, file).await? {
        return Ok(status);
    }

    handle_xml_upload(state, file).await
}

fn observe_upload(state: &AppState, file: &UploadedFile, result: &Result<StatusCode, AppError>) {
    let kind = file_type(&file.original_name);
    let status = match result {
        Ok(status) => *status,
        Err(e) => e.status(),
    };
    if status.is_client_error() || status.is_server_error() {
        state.metrics.record_error(&kind);
    } else {
        state.metrics.record_upload(&kind);
    }
}

pub fn check_upload_size(state: &AppState, file: &UploadedFile) {
    let threshold = state.config.size_challenge_threshold;
    state
        .scoreboard
        .solve_if(Challenge::UploadSize, || file.size > threshold);
}

pub fn check_file_type(state: &AppState, file: &UploadedFile) {
    let kind = file_type(&file.original_name);
    state.scoreboard.solve_if(Challenge::UploadType, || {
        !is_allowed_type(&kind, &state.config.allowed_file_types)
    });
}

/// Stages a `.zip` upload and extracts it below the uploads directory.
/// Answers 204 for every archive; other files pass through.
pub async fn handle_zip_file_upload(
    state: &AppState,
    file: &UploadedFile,
) -> Result<Flow, AppError> {
    if !file.has_extension(".zip") {
        return Ok(Flow::Continue);
    }

    if !file.buffer.is_empty() && state.scoreboard.is_enabled(Challenge::FileWrite) {
        let filename = file.lowercase_name();
        let data = file.buffer.clone();
        let temp_dir = state.config.temp_dir.clone();
        let options = ExtractOptions {
            uploads_dir: path::absolute(&state.config.uploads_dir)?,
            extraction_root: path::absolute(&state.config.extraction_root)?,
        };
        let protected = path::absolute(&state.config.protected_file)?;

        let report = tokio::task::spawn_blocking(move || -> ZipResult<ExtractReport> {
            let staged = archive::stage_archive(&temp_dir, &filename, &data)?;
            archive::extract_zip(staged.path(), &options)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Archive worker failed: {}", e)))??;

        info!(
            "📦 Extracted {} of {} entries from {} ({} discarded)",
            report.extracted,
            report.entries.len(),
            file.original_name,
            report.skipped
        );

        state.scoreboard.solve_if(Challenge::FileWrite, || {
            report.entries.iter().any(|entry| *entry == protected)
        });
    }

    Ok(Flow::Done(StatusCode::NO_CONTENT))
}

/// Parses `.xml` uploads and reports the interface as deprecated.
pub async fn handle_xml_upload(
    state: &AppState,
    file: &UploadedFile,
) -> Result<StatusCode, AppError> {
    if !file.has_extension(".xml") {
        return Ok(StatusCode::NO_CONTENT);
    }

    state.scoreboard.solve(Challenge::DeprecatedInterface);

    if file.buffer.is_empty() || !state.scoreboard.is_enabled(Challenge::DeprecatedInterface) {
        return Err(AppError::Gone(format!(
            "{} ({})",
            DEPRECATED_MESSAGE, file.original_name
        )));
    }

    let data = String::from_utf8_lossy(&file.buffer).into_owned();
    let limits = XmlLimits {
        timeout: state.config.xml_parse_timeout,
        expansion_limit: state.config.xml_expansion_limit,
        resolve_external: state.config.xml_resolve_external,
    };

    match xml_parser::parse_with_timeout(data, limits).await {
        Ok(rendered) => {
            state.scoreboard.solve_if(Challenge::XxeFileDisclosure, || {
                matches_etc_passwd_file(&rendered) || matches_system_ini_file(&rendered)
            });
            Err(AppError::Gone(format!(
                "{}: {} ({})",
                DEPRECATED_MESSAGE,
                trunc(&rendered, RENDERED_XML_LIMIT),
                file.original_name
            )))
        }
        Err(e) if e.is_resource_exhaustion() => {
            warn!("XML upload {} exhausted its parse budget: {}", file.original_name, e);
            if state.scoreboard.not_solved(Challenge::XxeDos) {
                state.scoreboard.solve(Challenge::XxeDos);
            }
            Err(AppError::ServiceUnavailable(UNAVAILABLE_MESSAGE.to_string()))
        }
        Err(e) => Err(AppError::Gone(format!(
            "{}: {} ({})",
            DEPRECATED_MESSAGE, e, file.original_name
        ))),
    }
}
