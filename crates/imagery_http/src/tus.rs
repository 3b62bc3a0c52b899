//! tus 1.0.0 front door (core protocol plus the `creation` extension).
//!
//! Routes here translate tus headers into [`imagery_core::Uploads`] tus operations, which share
//! buffering, flushing and completion with the explicit part protocol.
use std::collections::HashMap;

use axum::extract::{BodyStream, Extension, Path, State, TypedHeader};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Method, Request, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ::headers::HeaderMapExt;

use imagery_core::{OwnerRef, TusCreate, UploadAction};

use super::errors::{Error, Result};
use super::headers::{
    TusResumable, UploadLength, UploadMetadata, UploadOffset, IMAGE_ID, IMAGE_URL,
    OFFSET_OCTET_STREAM, TUS_EXTENSION, TUS_MAX_SIZE, TUS_RESUMABLE_VERSION, TUS_VERSION,
};
use super::uploads::upload_id;
use super::Imagery;

/// Rejects tus requests, other than discovery, that do not speak protocol version 1.0.0.
pub(crate) async fn require_tus_resumable<B>(
    tus_resumable: Option<TypedHeader<TusResumable>>,
    req: Request<B>,
    next: Next<B>,
) -> Result<Response> {
    if req.method() != Method::OPTIONS {
        match tus_resumable {
            Some(TypedHeader(v)) if v.is_supported() => {}
            _ => return Err(Error::TusVersionUnsupported),
        }
    }
    Ok(next.run(req).await)
}

// OPTIONS /:resource/:id/uploads/tus
async fn options(State(imagery): State<Imagery>) -> Result<Response> {
    let mut headers = HeaderMap::new();
    headers.insert(TUS_VERSION.clone(), TUS_RESUMABLE_VERSION.clone());
    headers.insert(TUS_EXTENSION.clone(), HeaderValue::from_static("creation"));
    headers.insert(
        TUS_MAX_SIZE.clone(),
        HeaderValue::from(imagery.uploads.settings().tus_max_size),
    );
    Ok((StatusCode::NO_CONTENT, headers).into_response())
}

// POST /:resource/:id/uploads/tus
async fn create(
    State(imagery): State<Imagery>,
    Extension(owner): Extension<OwnerRef>,
    upload_length: Option<TypedHeader<UploadLength>>,
    upload_metadata: Option<TypedHeader<UploadMetadata>>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    imagery
        .authorize(&owner, UploadAction::Initiate, &headers)
        .await?;

    let TypedHeader(UploadLength(length)) =
        upload_length.ok_or(Error::MissingHeader("Upload-Length"))?;
    let max = imagery.uploads.settings().tus_max_size;
    if length > max {
        return Err(Error::UploadTooLarge { length, max });
    }
    let metadata = upload_metadata
        .map(|TypedHeader(m)| m)
        .unwrap_or_default();

    let session = imagery
        .uploads
        .tus_create(
            &owner,
            TusCreate {
                upload_length: length,
                content_type: metadata.get("filetype").map(String::from),
                content_hash: metadata.get("contentHash").map(String::from),
            },
        )
        .await?;

    let location = format!("{}/{}", uri.path().trim_end_matches('/'), session.id);
    let mut headers = HeaderMap::new();
    headers.insert(header::LOCATION, HeaderValue::from_str(&location)?);
    Ok((StatusCode::CREATED, headers).into_response())
}

// HEAD /:resource/:id/uploads/tus/:upload_id
async fn head(
    State(imagery): State<Imagery>,
    Extension(owner): Extension<OwnerRef>,
    Path(path_params): Path<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response> {
    let session_id = upload_id(&path_params)?;
    imagery
        .authorize(&owner, UploadAction::Status, &headers)
        .await?;

    let session = imagery.uploads.tus_offset(&owner, &session_id).await?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.typed_insert(UploadOffset(session.received_bytes as u64));
    if let Some(length) = session.upload_length {
        headers.typed_insert(UploadLength(length as u64));
    }
    Ok((StatusCode::OK, headers).into_response())
}

// PATCH /:resource/:id/uploads/tus/:upload_id
async fn patch(
    State(imagery): State<Imagery>,
    Extension(owner): Extension<OwnerRef>,
    Path(path_params): Path<HashMap<String, String>>,
    upload_offset: Option<TypedHeader<UploadOffset>>,
    headers: HeaderMap,
    body: BodyStream,
) -> Result<Response> {
    let session_id = upload_id(&path_params)?;
    imagery
        .authorize(&owner, UploadAction::Append, &headers)
        .await?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if content_type != Some(OFFSET_OCTET_STREAM) {
        return Err(Error::UnsupportedMediaType(OFFSET_OCTET_STREAM));
    }
    let TypedHeader(UploadOffset(offset)) =
        upload_offset.ok_or(Error::MissingHeader("Upload-Offset"))?;

    let progress = imagery
        .uploads
        .tus_patch(&owner, &session_id, offset, body)
        .await?;

    let mut headers = HeaderMap::new();
    headers.typed_insert(UploadOffset(progress.offset));
    if let Some(completed) = progress.completed {
        headers.insert(
            IMAGE_ID.clone(),
            HeaderValue::from_str(&completed.image.id.to_string())?,
        );
        headers.insert(IMAGE_URL.clone(), HeaderValue::from_str(&completed.url)?);
    }
    Ok((StatusCode::NO_CONTENT, headers).into_response())
}

pub(crate) fn router() -> axum::Router<Imagery> {
    use axum::routing::{head as head_route, options as options_route};

    axum::Router::new()
        .route(
            "/:resource/:id/uploads/tus",
            options_route(options).post(create),
        )
        .route(
            "/:resource/:id/uploads/tus/:upload_id",
            head_route(head).patch(patch),
        )
}
