//! Errors reported by resource API calls

use std::fmt;

use cirrus_tokens::backoff::Transient;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const UNAVAILABLE_MESSAGE: &str = "Request to Google Cloud failed";
const UNKNOWN_MESSAGE: &str = "Bad response from Google Cloud";

/// A single entry in the `errors` list of an API error
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorProto {
    /// Short machine-readable reason, e.g. `notFound`
    pub reason: String,
    /// Where the error occurred, if reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The `error` object of a failed API response
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status code as reported by the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Individual errors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorProto>,
    /// Canonical status name, e.g. `NOT_FOUND`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ErrorResponse {
    fn synthetic(status: u16, message: &str, canonical: &str) -> Self {
        Self {
            code: Some(status),
            message: Some(message.to_owned()),
            errors: Vec::new(),
            status: Some(canonical.to_owned()),
        }
    }

    /// The error reported for a retry-safe server failure
    pub(crate) fn unavailable(status: u16) -> Self {
        let canonical = if status == 500 { "INTERNAL" } else { "UNAVAILABLE" };
        Self::synthetic(status, UNAVAILABLE_MESSAGE, canonical)
    }

    /// Interprets the body of a failed response
    ///
    /// Bodies without a parseable `error` object produce an `UNKNOWN` error.
    pub(crate) fn from_body(status: u16, body: &[u8]) -> Self {
        #[derive(Deserialize)]
        struct Envelope {
            error: Option<ErrorResponse>,
        }

        match serde_json::from_slice::<Envelope>(body) {
            Ok(Envelope { error: Some(error) }) => error,
            _ => Self::synthetic(status, UNKNOWN_MESSAGE, "UNKNOWN"),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message.as_deref().unwrap_or("no message"))?;
        if let Some(status) = &self.status {
            write!(f, " ({status})")?;
        }
        Ok(())
    }
}

/// A request or response body failed validation
#[derive(Clone, Debug, Error)]
#[error("{0}")]
pub struct ValidationError(String);

impl ValidationError {
    /// Constructs a validation error with a description of the problem
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// An error calling a resource API
#[derive(Debug, Error)]
pub enum RequestError {
    /// The service failed in a way that is safe to retry (500, 502, 503, 504)
    #[error("service unavailable (HTTP {status}): {error}")]
    ServiceUnavailable {
        /// HTTP status code
        status: u16,
        /// Synthesized error details
        error: ErrorResponse,
    },
    /// The service rejected the request
    #[error("request failed (HTTP {status}): {error}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error details reported by the service
        error: ErrorResponse,
    },
    /// The request could not be sent, or no token could be attached
    #[error(transparent)]
    Transport(#[from] reqwest_middleware::Error),
    /// The request body could not be encoded as JSON
    #[error("unable to encode request body")]
    Encode(#[source] serde_json::Error),
    /// The response body could not be decoded from JSON
    #[error("unable to decode response body")]
    Decode(#[source] serde_json::Error),
    /// A request or response body failed validation
    #[error("invalid {direction} body")]
    Validation {
        /// Whether the request or response failed
        direction: Direction,
        /// The validation failure
        #[source]
        source: ValidationError,
    },
}

/// Which side of an exchange a body belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// The outgoing request body
    Request,
    /// The incoming response body
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Request => "request",
            Self::Response => "response",
        })
    }
}

impl RequestError {
    /// The HTTP status of the failed response, if one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ServiceUnavailable { status, .. } | Self::Api { status, .. } => Some(*status),
            Self::Transport(reqwest_middleware::Error::Reqwest(e)) => {
                e.status().map(|s| s.as_u16())
            }
            _ => None,
        }
    }

    /// The error details, if the service responded with a failure
    pub fn error_response(&self) -> Option<&ErrorResponse> {
        match self {
            Self::ServiceUnavailable { error, .. } | Self::Api { error, .. } => Some(error),
            _ => None,
        }
    }

    pub(crate) fn from_failed_response(status: u16, body: &[u8]) -> Self {
        match status {
            500 | 502 | 503 | 504 => Self::ServiceUnavailable {
                status,
                error: ErrorResponse::unavailable(status),
            },
            _ => Self::Api {
                status,
                error: ErrorResponse::from_body(status, body),
            },
        }
    }
}

impl Transient for RequestError {
    fn is_transient(&self) -> bool {
        match self {
            Self::ServiceUnavailable { .. } => true,
            Self::Transport(reqwest_middleware::Error::Reqwest(e)) => {
                e.is_timeout() || e.is_connect()
            }
            Self::Transport(reqwest_middleware::Error::Middleware(e)) => e
                .chain()
                .find_map(|e| e.downcast_ref::<reqwest::Error>())
                .is_some_and(|e| e.is_timeout() || e.is_connect()),
            _ => false,
        }
    }
}

impl From<(Direction, ValidationError)> for RequestError {
    fn from((direction, source): (Direction, ValidationError)) -> Self {
        Self::Validation { direction, source }
    }
}
