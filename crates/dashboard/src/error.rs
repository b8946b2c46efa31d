//! Boundary error types. None of these are fatal: the reconciler and the
//! dispatcher log them and record an error event, then carry on.

use thiserror::Error;

/// An inbound bus payload that could not be turned into a state change.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not valid utf-8")]
    NotUtf8,
    #[error("bad json: {0}")]
    Json(String),
    #[error("unknown actuator command '{0}'")]
    UnknownCommand(String),
    #[error("not a numeric level: '{0}'")]
    NotNumeric(String),
}

impl From<serde_json::Error> for PayloadError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

/// A failed metric fetch. Only the metric it belongs to is affected.
#[derive(Debug, Error)]
pub enum RestError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
}

/// A publish/subscribe/close request the MQTT client refused.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("mqtt client: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("bus is closed")]
    Closed,
}
