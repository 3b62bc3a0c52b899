use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;
use thiserror;

use imagery_core::{Error as CoreError, ErrorKind};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("http invalid header name")]
    HTTPInvalidHeaderName(#[from] http::header::InvalidHeaderName),
    #[error("http invalid header value")]
    HTTPInvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("missing header: {0}")]
    MissingHeader(&'static str),
    #[error("missing path parameter: {0}")]
    MissingPathParameter(&'static str),
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("unsupported Tus-Resumable version; this server speaks 1.0.0")]
    TusVersionUnsupported,
    #[error("unsupported media type: expected {0}")]
    UnsupportedMediaType(&'static str),
    #[error("Upload-Length {length} exceeds Tus-Max-Size {max}")]
    UploadTooLarge { length: u64, max: u64 },

    #[error(transparent)]
    ImageryCoreError(#[from] CoreError),
}

#[derive(Debug, Serialize)]
struct ErrorInfo {
    kind: &'static str,
    message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    declared: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    computed: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorInfo,
}

#[inline]
fn into_error_response(status: StatusCode, kind: &'static str, message: String) -> Response {
    let response = ErrorResponse {
        error: ErrorInfo {
            kind,
            message,
            declared: None,
            computed: None,
        },
    };
    (status, axum::Json(response)).into_response()
}

fn status_code(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidState => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::IntegrityError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[inline]
fn core_error_to_response(e: CoreError) -> Response {
    let kind = e.kind();
    let status = status_code(kind);
    match e {
        CoreError::IntegrityError { declared, computed } => {
            let response = ErrorResponse {
                error: ErrorInfo {
                    kind: kind.as_str(),
                    message: String::from("assembled content does not match the declared hash"),
                    declared: Some(declared.to_string()),
                    computed: Some(computed.to_string()),
                },
            };
            (status, axum::Json(response)).into_response()
        }
        e if kind == ErrorKind::Internal => {
            tracing::warn!("{e:?}");
            into_error_response(status, kind.as_str(), String::from("internal server error"))
        }
        e if kind == ErrorKind::Unavailable => {
            tracing::warn!("{e}");
            into_error_response(status, kind.as_str(), format!("{e}"))
        }
        e => into_error_response(status, kind.as_str(), format!("{e}")),
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::ImageryCoreError(e) => core_error_to_response(e),
            Error::MissingHeader(_) | Error::MissingPathParameter(_) | Error::InvalidBody(_) => {
                into_error_response(
                    StatusCode::BAD_REQUEST,
                    ErrorKind::InvalidArgument.as_str(),
                    format!("{}", self),
                )
            }
            // only raised while building response headers
            Error::HTTPInvalidHeaderName(_) | Error::HTTPInvalidHeaderValue(_) => {
                tracing::warn!("{self:?}");
                into_error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorKind::Internal.as_str(),
                    String::from("internal server error"),
                )
            }
            Error::TusVersionUnsupported => {
                let mut response = into_error_response(
                    StatusCode::PRECONDITION_FAILED,
                    ErrorKind::InvalidArgument.as_str(),
                    format!("{}", self),
                );
                response.headers_mut().insert(
                    crate::headers::TUS_VERSION.clone(),
                    crate::headers::TUS_RESUMABLE_VERSION.clone(),
                );
                response
            }
            Error::UnsupportedMediaType(_) => into_error_response(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                ErrorKind::InvalidArgument.as_str(),
                format!("{}", self),
            ),
            Error::UploadTooLarge { .. } => into_error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                ErrorKind::InvalidArgument.as_str(),
                format!("{}", self),
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case(CoreError::InvalidArgument(String::from("x")), StatusCode::BAD_REQUEST)]
    #[case(CoreError::InvalidState(String::from("x")), StatusCode::CONFLICT)]
    #[case(CoreError::NotFound(String::from("x")), StatusCode::NOT_FOUND)]
    #[case(CoreError::Conflict(String::from("x")), StatusCode::CONFLICT)]
    #[case(CoreError::Unauthorized(String::from("x")), StatusCode::FORBIDDEN)]
    #[case(CoreError::Configuration(String::from("x")), StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(
        CoreError::Unavailable(imagery_objectstore::Error::NoSuchUpload(String::from("u"))),
        StatusCode::SERVICE_UNAVAILABLE
    )]
    fn core_errors_map_to_status(#[case] err: CoreError, #[case] expected: StatusCode) {
        assert_eq!(Error::from(err).into_response().status(), expected);
    }

    #[rstest]
    #[case(Error::TusVersionUnsupported, StatusCode::PRECONDITION_FAILED)]
    #[case(
        Error::UnsupportedMediaType("application/offset+octet-stream"),
        StatusCode::UNSUPPORTED_MEDIA_TYPE
    )]
    #[case(Error::UploadTooLarge { length: 2, max: 1 }, StatusCode::PAYLOAD_TOO_LARGE)]
    #[case(Error::MissingHeader("Upload-Offset"), StatusCode::BAD_REQUEST)]
    #[case(
        http::HeaderValue::from_str("line\nbreak").unwrap_err().into(),
        StatusCode::INTERNAL_SERVER_ERROR
    )]
    #[case(
        http::HeaderName::from_bytes(b"bad name").unwrap_err().into(),
        StatusCode::INTERNAL_SERVER_ERROR
    )]
    fn protocol_errors_map_to_status(#[case] err: Error, #[case] expected: StatusCode) {
        assert_eq!(err.into_response().status(), expected);
    }
}
