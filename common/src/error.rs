use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::io;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("filename is not valid percent-encoded utf-8")]
    BadEncoding,
    #[error("filename length out of bounds")]
    Length,
    #[error("filename contains a forbidden character")]
    Forbidden,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("node not registered: {0}")]
    NodeNotRegistered(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),
    #[error("chunk integrity error: {0}")]
    ChunkIntegrity(String),
    #[error("chunk write error: {0}")]
    ChunkWrite(String),
    #[error("payload too large")]
    TooLarge,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("bad filename: {0}")]
    BadKey(#[from] KeyError),
    #[error("upstream request failed: {0}")]
    UpstreamReq(#[from] reqwest::Error),
    #[error("upstream status {0}")]
    UpstreamStatus(reqwest::StatusCode),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NodeNotRegistered(_) => StatusCode::NOT_FOUND,
            ApiError::FileNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ManifestNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ChunkIntegrity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ChunkWrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::BadKey(_) => StatusCode::BAD_REQUEST,
            ApiError::UpstreamReq(_) => StatusCode::BAD_GATEWAY,
            ApiError::UpstreamStatus(_) => StatusCode::BAD_GATEWAY,
            ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Any(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        if status_code.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (status_code, self.to_string()).into_response()
    }
}
