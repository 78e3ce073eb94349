use axum::{
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{FileQuery, FileRecord};
use crate::AppState;

/// List files in a folder
/// GET /api/v1/files?parent_folder_id=xxx
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Json<ApiResponse<Vec<FileRecord>>>> {
    let files = state.files.list_files_in_folder(query.parent_folder_id).await?;
    Ok(Json(ApiResponse::success(files)))
}

/// Get a specific file
/// GET /api/v1/files/:id
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<FileRecord>>> {
    let file = state.files.get_file_by_id(id).await?;
    Ok(Json(ApiResponse::success(file)))
}

/// Upload a file
/// POST /api/v1/files/upload
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<FileRecord>>> {
    let mut data: Option<Bytes> = None;
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut parent_folder_id: Option<i64> = None;

    // Process multipart fields
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to process multipart: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                content_type = field.content_type().map(|s| s.to_string());
                data = Some(field.bytes().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read file data: {}", e))
                })?);
            }
            "parent_folder_id" => {
                let text = field.text().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read parent_folder_id: {}", e))
                })?;
                let text = text.trim();
                if !text.is_empty() {
                    let id = text.parse().map_err(|_| {
                        AppError::BadRequest(format!("Invalid parent_folder_id: {}", text))
                    })?;
                    parent_folder_id = Some(id);
                }
            }
            _ => {}
        }
    }

    let data = data.ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;
    let file_name = file_name.ok_or_else(|| AppError::BadRequest("No file name provided".to_string()))?;

    let saved = state
        .files
        .save_file(data, &file_name, content_type.as_deref(), parent_folder_id)
        .await?;

    Ok(Json(ApiResponse::success_with_message(saved.message(), saved.file)))
}

/// Delete a file record
/// DELETE /api/v1/files/:id
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.files.delete_by_id(id).await?;
    Ok(Json(ApiResponse::<()>::success_message("File deleted")))
}
