use std::collections::HashMap;

use axum::extract::{Extension, Multipart, Path, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use imagery_core::{OwnerRef, UploadAction, UploadSession, UploadStatus};

use super::errors::{Error, Result};
use super::Imagery;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateRequest {
    content_type: String,
    content_hash: String,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest {
    target_image_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadStatusResponse<'a> {
    upload_id: Uuid,
    protocol: &'static str,
    status: UploadStatus,
    current_part_index: i64,
    buffered_bytes: u64,
    received_bytes: i64,
    content_hash: Option<&'a str>,
    total_parts: Option<i32>,
    image_id: Option<Uuid>,
}

impl<'a> From<&'a UploadSession> for UploadStatusResponse<'a> {
    fn from(session: &'a UploadSession) -> Self {
        Self {
            upload_id: session.id,
            protocol: session.protocol.as_str(),
            status: session.status,
            current_part_index: session.current_part_index,
            buffered_bytes: session.buffered_bytes(),
            received_bytes: session.received_bytes,
            content_hash: session.content_hash.as_ref().map(|h| h.as_str()),
            total_parts: session.total_parts,
            image_id: session.image_id,
        }
    }
}

pub(crate) fn upload_id(params: &HashMap<String, String>) -> Result<Uuid> {
    let s = params
        .get("upload_id")
        .ok_or(Error::MissingPathParameter("upload_id"))?;
    Uuid::parse_str(s)
        .map_err(|_| imagery_core::Error::NotFound(format!("upload {s}")).into())
}

// POST /:resource/:id/uploads
async fn initiate(
    State(imagery): State<Imagery>,
    Extension(owner): Extension<OwnerRef>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    imagery
        .authorize(&owner, UploadAction::Initiate, &headers)
        .await?;

    let req: InitiateRequest =
        serde_json::from_slice(&body).map_err(|e| Error::InvalidBody(e.to_string()))?;
    let session = imagery
        .uploads
        .initiate(&owner, &req.content_type, &req.content_hash)
        .await?;

    let location = format!("/{}/{}/uploads/{}", owner.kind, owner.id, session.id);
    let mut headers = HeaderMap::new();
    headers.insert(header::LOCATION, HeaderValue::from_str(&location)?);
    Ok((
        StatusCode::CREATED,
        headers,
        Json(UploadStatusResponse::from(&session)),
    )
        .into_response())
}

// POST /:resource/:id/uploads/:upload_id/parts
//
// multipart/form-data with a `partIndex` text field and a `file` field carrying the chunk.
async fn append(
    State(imagery): State<Imagery>,
    Extension(owner): Extension<OwnerRef>,
    Path(path_params): Path<HashMap<String, String>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response> {
    let session_id = upload_id(&path_params)?;
    imagery
        .authorize(&owner, UploadAction::Append, &headers)
        .await?;

    let mut part_index: Option<i64> = None;
    let mut chunk: Option<Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidBody(e.to_string()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("partIndex") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| Error::InvalidBody(e.to_string()))?;
                let index = text.trim().parse::<i64>().map_err(|_| {
                    Error::InvalidBody(format!("partIndex must be an integer, got {text:?}"))
                })?;
                part_index = Some(index);
            }
            Some("file") => {
                chunk = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| Error::InvalidBody(e.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let part_index =
        part_index.ok_or_else(|| Error::InvalidBody(String::from("missing partIndex field")))?;
    let chunk = chunk.ok_or_else(|| Error::InvalidBody(String::from("missing file field")))?;

    let session = imagery
        .uploads
        .append(&owner, &session_id, part_index, chunk)
        .await?;

    Ok((StatusCode::OK, Json(UploadStatusResponse::from(&session))).into_response())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteResponse {
    upload_id: Uuid,
    image_id: Uuid,
    image_url: String,
    is_primary: bool,
    total_parts: Option<i32>,
}

// POST /:resource/:id/uploads/:upload_id/complete
//
// The JSON body is optional; an empty body completes without a target image.
async fn complete(
    State(imagery): State<Imagery>,
    Extension(owner): Extension<OwnerRef>,
    Path(path_params): Path<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let session_id = upload_id(&path_params)?;
    imagery
        .authorize(&owner, UploadAction::Complete, &headers)
        .await?;

    let req: CompleteRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CompleteRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| Error::InvalidBody(e.to_string()))?
    };

    let completed = imagery
        .uploads
        .complete(&owner, &session_id, req.target_image_id)
        .await?;

    Ok((
        StatusCode::OK,
        Json(CompleteResponse {
            upload_id: completed.session.id,
            image_id: completed.image.id,
            image_url: completed.url,
            is_primary: completed.image.is_primary,
            total_parts: completed.session.total_parts,
        }),
    )
        .into_response())
}

// GET /:resource/:id/uploads/:upload_id
async fn status(
    State(imagery): State<Imagery>,
    Extension(owner): Extension<OwnerRef>,
    Path(path_params): Path<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response> {
    let session_id = upload_id(&path_params)?;
    imagery
        .authorize(&owner, UploadAction::Status, &headers)
        .await?;

    let session = imagery.uploads.status(&owner, &session_id).await?;
    Ok((StatusCode::OK, Json(UploadStatusResponse::from(&session))).into_response())
}

pub(crate) fn router() -> axum::Router<Imagery> {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/:resource/:id/uploads", post(initiate))
        .route("/:resource/:id/uploads/:upload_id", get(status))
        .route("/:resource/:id/uploads/:upload_id/parts", post(append))
        .route("/:resource/:id/uploads/:upload_id/complete", post(complete))
}
