use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Error taxonomy for the order/stock API surface.
///
/// `Internal` never carries detail into the response body; the cause is
/// logged where the error is constructed and the client gets a generic code.
#[derive(Debug)]
pub enum ApiError {
    Validation {
        code: &'static str,
        field: Option<&'static str>,
        trace_id: Option<Uuid>,
        message: Option<String>,
    },
    NotFound {
        code: &'static str,
        trace_id: Option<Uuid>,
    },
    DuplicateKey {
        trace_id: Option<Uuid>,
        message: Option<String>,
    },
    InvalidState {
        trace_id: Option<Uuid>,
        message: Option<String>,
    },
    InsufficientStock {
        item_id: Uuid,
        trace_id: Option<Uuid>,
        message: Option<String>,
    },
    ConcurrencyConflict {
        trace_id: Option<Uuid>,
    },
    Internal {
        trace_id: Option<Uuid>,
    },
}

impl ApiError {
    pub fn validation(code: &'static str, field: Option<&'static str>) -> Self {
        Self::Validation {
            code,
            field,
            trace_id: None,
            message: None,
        }
    }

    pub fn validation_msg(
        code: &'static str,
        field: Option<&'static str>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            code,
            field,
            trace_id: None,
            message: Some(message.into()),
        }
    }

    pub fn not_found(code: &'static str) -> Self {
        Self::NotFound {
            code,
            trace_id: None,
        }
    }

    pub fn duplicate_key(message: impl Into<String>) -> Self {
        Self::DuplicateKey {
            trace_id: None,
            message: Some(message.into()),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            trace_id: None,
            message: Some(message.into()),
        }
    }

    pub fn insufficient_stock(item_id: Uuid, message: impl Into<String>) -> Self {
        Self::InsufficientStock {
            item_id,
            trace_id: None,
            message: Some(message.into()),
        }
    }

    /// Log the cause and return an opaque 500.
    pub fn internal<E: std::fmt::Display>(e: E, trace_id: Option<Uuid>) -> Self {
        tracing::error!(error = %e, "internal error");
        Self::Internal { trace_id }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { code, .. } => code,
            ApiError::NotFound { code, .. } => code,
            ApiError::DuplicateKey { .. } => "duplicate_key",
            ApiError::InvalidState { .. } => "invalid_state",
            ApiError::InsufficientStock { .. } => "insufficient_stock",
            ApiError::ConcurrencyConflict { .. } => "concurrency_conflict",
            ApiError::Internal { .. } => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::DuplicateKey { .. }
            | ApiError::InvalidState { .. }
            | ApiError::InsufficientStock { .. }
            | ApiError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_code = self.code();
        let body = match self {
            ApiError::Validation {
                code,
                field,
                trace_id,
                message,
            } => ErrorBody {
                code: code.into(),
                field: field.map(Into::into),
                item_id: None,
                trace_id,
                message,
            },
            ApiError::NotFound { code, trace_id } => ErrorBody {
                code: code.into(),
                field: None,
                item_id: None,
                trace_id,
                message: None,
            },
            ApiError::DuplicateKey { trace_id, message } => ErrorBody {
                code: error_code.into(),
                field: None,
                item_id: None,
                trace_id,
                message,
            },
            ApiError::InvalidState { trace_id, message } => ErrorBody {
                code: error_code.into(),
                field: None,
                item_id: None,
                trace_id,
                message,
            },
            ApiError::InsufficientStock {
                item_id,
                trace_id,
                message,
            } => ErrorBody {
                code: error_code.into(),
                field: None,
                item_id: Some(item_id),
                trace_id,
                message,
            },
            ApiError::ConcurrencyConflict { trace_id } => ErrorBody {
                code: error_code.into(),
                field: None,
                item_id: None,
                trace_id,
                message: None,
            },
            ApiError::Internal { trace_id } => ErrorBody {
                code: error_code.into(),
                field: None,
                item_id: None,
                trace_id,
                message: None,
            },
        };
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(error_code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
