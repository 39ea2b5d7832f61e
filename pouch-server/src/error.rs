use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pouch_blob::BlobError;
use pouch_core::errors::PouchError;

/// HTTP-facing error wrapper. Anything that reaches a handler boundary
/// becomes one of these; structured `PouchError`s keep their status and
/// class name even when buried inside anyhow context chains.
#[derive(Debug)]
pub struct ApiError(pub anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl From<PouchError> for ApiError {
    fn from(e: PouchError) -> Self {
        Self(e.into_anyhow())
    }
}

impl From<BlobError> for ApiError {
    fn from(e: BlobError) -> Self {
        Self(blob_to_pouch(e).into_anyhow())
    }
}

/// Map gateway errors onto the wire taxonomy: unknown session is 404,
/// malformed input is 400, writes to a closed session are 409, and
/// anything infrastructural is a 500 that hides its source.
pub fn blob_to_pouch(e: BlobError) -> PouchError {
    match e {
        BlobError::NotFound { .. } => PouchError::not_found(e.to_string()),
        BlobError::Invalid { .. } | BlobError::TooLarge { .. } => {
            PouchError::bad_request(e.to_string())
        }
        BlobError::Closed { .. } => PouchError::conflict(e.to_string()),
        BlobError::Backend { .. } | BlobError::Io { .. } | BlobError::Serialization { .. } => {
            PouchError::general_error("storage failure").with_source(anyhow::Error::new(e))
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(pouch) = self.0.chain().find_map(|e| e.downcast_ref::<PouchError>()) {
            let safe = pouch.sanitize_for_client();
            let status =
                StatusCode::from_u16(safe.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, Json(safe.to_json())).into_response();
        }

        let pouch = PouchError::general_error(self.0.to_string());
        let safe = pouch.sanitize_for_client();
        let status =
            StatusCode::from_u16(safe.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(safe.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_session_maps_to_404() {
        let pouch = blob_to_pouch(BlobError::not_found("tok/a.png"));
        assert_eq!(pouch.code(), 404);
        assert_eq!(pouch.class_name(), "not-found");
    }

    #[test]
    fn closed_session_maps_to_409() {
        let pouch = blob_to_pouch(BlobError::closed("complete"));
        assert_eq!(pouch.code(), 409);
    }

    #[test]
    fn backend_failures_hide_their_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk path /var/secret");
        let pouch = blob_to_pouch(BlobError::Io { source: io });
        assert_eq!(pouch.code(), 500);
        let body = pouch.sanitize_for_client().to_json();
        assert_eq!(body["message"], "storage failure");
    }
}
