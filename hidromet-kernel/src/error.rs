//! Frontière d'erreur HTTP : chaque erreur de composant devient un
//! statut + un corps `{"error": …, "details": …}`.

use crate::arduino::ArduinoError;
use crate::reports::ReportError;
use crate::visits::VisitError;
use crate::weather::WeatherError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    Authentication(String),
    #[error("{message}")]
    Upstream { status: u16, message: String, details: Value },
    #[error("{0}")]
    RateLimited(String),
    #[error("{message}")]
    NotFound { message: String, details: Value },
    #[error("{0}")]
    LockTimeout(String),
    #[error("{0}")]
    Validation(String),
    #[error("Ya existe un informe generado este mes")]
    DuplicateReport { days_remaining: i64, existing_report_id: String },
    #[error("{0}")]
    InsufficientData(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Configuration(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Upstream { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::LockTimeout(_) | ApiError::InsufficientData(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Validation(_) | ApiError::DuplicateReport { .. } => StatusCode::BAD_REQUEST,
        }
    }

    fn details(&self) -> Value {
        match self {
            ApiError::Upstream { status, details, .. } => {
                let mut d = json!({ "upstream_status": status });
                if let (Some(obj), Some(extra)) = (d.as_object_mut(), details.as_object()) {
                    obj.extend(extra.clone());
                }
                d
            }
            ApiError::NotFound { details, .. } => details.clone(),
            ApiError::DuplicateReport { days_remaining, existing_report_id } => json!({
                "days_remaining": days_remaining,
                "existing_report_id": existing_report_id,
            }),
            _ => Value::Null,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("[http] {} {}", status.as_u16(), self);
        } else {
            warn!("[http] {} {}", status.as_u16(), self);
        }
        let body = json!({ "error": self.to_string(), "details": self.details() });
        (status, Json(body)).into_response()
    }
}

impl From<ArduinoError> for ApiError {
    fn from(err: ArduinoError) -> Self {
        let message = err.to_string();
        match err {
            ArduinoError::MissingCredentials => ApiError::Configuration(message),
            ArduinoError::Authentication(_) => ApiError::Authentication(message),
            ArduinoError::ThingNotFound { name, available } => ApiError::NotFound {
                message,
                details: json!({ "thing_name": name, "available": available }),
            },
            ArduinoError::RateLimited => ApiError::RateLimited(message),
            ArduinoError::Upstream { status, message: body } => ApiError::Upstream {
                status,
                message,
                details: json!({ "body": body }),
            },
            ArduinoError::Transport(_) => ApiError::Internal(message),
        }
    }
}

impl From<WeatherError> for ApiError {
    fn from(err: WeatherError) -> Self {
        let message = err.to_string();
        match err {
            WeatherError::InvalidId(_) => ApiError::Validation(message),
            WeatherError::Authentication(_) => ApiError::Authentication(message),
            WeatherError::RateLimited => ApiError::RateLimited(message),
            WeatherError::Upstream { status, message: body } => ApiError::Upstream {
                status,
                message,
                details: json!({ "body": body }),
            },
            WeatherError::MissingField(_) | WeatherError::InvalidPayload(_) => ApiError::Upstream {
                status: 502,
                message,
                details: Value::Null,
            },
            WeatherError::Transport(_) => ApiError::Internal(message),
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(err: ReportError) -> Self {
        let message = err.to_string();
        match err {
            ReportError::Duplicate { days_remaining, existing_report_id } => {
                ApiError::DuplicateReport { days_remaining, existing_report_id }
            }
            ReportError::NotFound(id) => ApiError::NotFound { message, details: json!({ "id": id }) },
            ReportError::InsufficientData(_) => ApiError::InsufficientData(message),
            ReportError::Io(_) | ReportError::Serialization(_) | ReportError::Date(_) | ReportError::Format(_) => {
                ApiError::Internal(message)
            }
        }
    }
}

impl From<VisitError> for ApiError {
    fn from(err: VisitError) -> Self {
        match err {
            VisitError::LockTimeout(_) => ApiError::LockTimeout(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(ArduinoError::MissingCredentials).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::from(ArduinoError::RateLimited).status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::from(WeatherError::InvalidId("abc".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(WeatherError::Authentication("x".into())).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(ReportError::NotFound("informe_x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(VisitError::LockTimeout(std::time::Duration::from_secs(10))).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_upstream_status_forwarded_or_bad_gateway() {
        let forwarded = ApiError::from(ArduinoError::Upstream { status: 503, message: "down".into() });
        assert_eq!(forwarded.status(), StatusCode::SERVICE_UNAVAILABLE);
        let odd = ApiError::from(WeatherError::Upstream { status: 302, message: String::new() });
        assert_eq!(odd.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_thing_not_found_lists_names() {
        let err = ApiError::from(ArduinoError::ThingNotFound {
            name: "Medidor de Flujo".into(),
            available: vec!["Otro".into()],
        });
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.details()["available"], json!(["Otro"]));
    }

    #[test]
    fn test_duplicate_report_details() {
        let err = ApiError::from(ReportError::Duplicate {
            days_remaining: 12,
            existing_report_id: "informe_20261001_080000".into(),
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.details()["days_remaining"], 12);
        assert_eq!(err.details()["existing_report_id"], "informe_20261001_080000");
    }
}
