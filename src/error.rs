use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GpioError>;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Invalid pin: {0}")]
    InvalidPin(u32),
    #[error("Pin {0} is not initialized")]
    NotInitialized(u32),
    #[error("Pin {0} is in use")]
    AlreadyInitialized(u32),
    #[error("Pin {0} is not an output")]
    NotOutput(u32),
    #[error("GPIO chip unavailable")]
    ChipUnavailable,
    #[error("System error: {0}")]
    Os(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("No sensor on pin {0}")]
    NoSensor(u32),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GpioError {
    pub fn code(&self) -> u32 {
        match self {
            GpioError::InvalidParameter(_) => 1,
            GpioError::InvalidPin(_) => 2,
            GpioError::NotInitialized(_) => 3,
            GpioError::AlreadyInitialized(_) => 4,
            GpioError::NotOutput(_) => 5,
            GpioError::Timeout(_) => 8,
            GpioError::Os(_) => 1000,
            GpioError::ChipUnavailable => 1001,
            GpioError::NoSensor(_) => 1002,
            GpioError::Config(_) => 1003,
        }
    }
}

impl From<std::io::Error> for GpioError {
    fn from(e: std::io::Error) -> Self {
        GpioError::Os(e.to_string())
    }
}

impl ResponseError for GpioError {
    fn status_code(&self) -> StatusCode {
        match self {
            GpioError::InvalidPin(_) => StatusCode::NOT_FOUND,
            GpioError::InvalidParameter(_)
            | GpioError::NotInitialized(_)
            | GpioError::AlreadyInitialized(_)
            | GpioError::NotOutput(_) => StatusCode::BAD_REQUEST,
            GpioError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GpioError::NoSensor(_) => StatusCode::SERVICE_UNAVAILABLE,
            GpioError::ChipUnavailable | GpioError::Os(_) | GpioError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(json!({ "error": self.to_string(), "code": self.code() }))
    }
}
