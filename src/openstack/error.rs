//! Error types for the OpenStack client.

use reqwest::StatusCode;
use thiserror::Error;

use crate::cloud::ConnectError;

/// Errors raised by the OpenStack client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OpenStackError {
    /// Raised when the profile lacks what authentication needs.
    #[error("incomplete profile: {message}")]
    Profile {
        /// Human-readable description.
        message: String,
    },
    /// Raised when a request cannot be sent or its body cannot be read.
    #[error("request to {url} failed: {message}")]
    Transport {
        /// Request URL.
        url: String,
        /// Error message from the HTTP client.
        message: String,
    },
    /// Raised when the service answers with a non-success status.
    #[error("{url} returned HTTP {status}: {message}")]
    Status {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },
    /// Raised when a response body has an unexpected shape.
    #[error("unexpected response from {url}: {message}")]
    Decode {
        /// Request URL.
        url: String,
        /// Deserialization error.
        message: String,
    },
    /// Raised when the HTTP client cannot be set up.
    #[error("cannot build HTTP client: {message}")]
    Client {
        /// Error message from the HTTP client builder.
        message: String,
    },
    /// Raised when the service catalog lacks a required service.
    #[error("service catalog has no {service} endpoint")]
    MissingEndpoint {
        /// Service type, for example `network`.
        service: String,
    },
}

impl OpenStackError {
    /// Classifies an authentication failure for `account`.
    ///
    /// Keystone answers 401 for bad credentials and 400 for an unresolvable
    /// domain; both are worth a retry with another domain.
    #[must_use]
    pub fn into_connect_error(self, account: &str) -> ConnectError {
        let account = account.to_owned();
        match self {
            Self::Status { status, .. }
                if status == StatusCode::UNAUTHORIZED.as_u16()
                    || status == StatusCode::BAD_REQUEST.as_u16() =>
            {
                ConnectError::Unauthorized {
                    account,
                    message: self.to_string(),
                }
            }
            Self::Profile { .. } | Self::MissingEndpoint { .. } => ConnectError::Profile {
                account,
                message: self.to_string(),
            },
            Self::Client { .. }
            | Self::Transport { .. }
            | Self::Status { .. }
            | Self::Decode { .. } => {
                ConnectError::Transport {
                    account,
                    message: self.to_string(),
                }
            }
        }
    }
}
