//! Error handling subsystem. Implements a custom Error type.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::prelude::*;

pub type ClResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	// Pre-join socket rejection
	Unauthorized,     // 4001/4002 - token absent or invalid
	DocumentNotFound, // 4004
	AccessDenied,     // 4005

	// Protocol
	Parse,
	ProtocolError(String),

	// Persistence / coordination
	PersistenceError(String),
	Internal(String),

	// External substrate
	SubstrateError(String),
	SubstrateFatal(String),

	// System
	ConfigError(String),
	Io(std::io::Error),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{:?}", self)
	}
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
struct ErrorResponse {
	code: String,
	message: String,
}

impl ErrorResponse {
	fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { code: code.into(), message: message.into() }
	}
}

impl IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		let (status, code, message) = match self {
			Error::Unauthorized => (
				StatusCode::UNAUTHORIZED,
				"E-AUTH-UNAUTH",
				"Authentication required or invalid token".to_string(),
			),
			Error::DocumentNotFound => {
				(StatusCode::NOT_FOUND, "E-DOC-NOTFOUND", "Document not found".to_string())
			}
			Error::AccessDenied => (
				StatusCode::FORBIDDEN,
				"E-AUTH-NOPERM",
				"You do not have permission to access this document".to_string(),
			),
			Error::Parse => (
				StatusCode::INTERNAL_SERVER_ERROR,
				"E-CORE-PARSE",
				"Internal server error".to_string(),
			),
			Error::ProtocolError(msg) => {
				(StatusCode::BAD_REQUEST, "E-PROTO-MALFORMED", format!("Malformed message: {msg}"))
			}
			Error::PersistenceError(msg) => {
				warn!("persistence error: {}", msg);
				(
					StatusCode::INTERNAL_SERVER_ERROR,
					"E-PERSIST-FAILED",
					"Internal server error".to_string(),
				)
			}
			Error::Internal(msg) => {
				warn!("internal error: {}", msg);
				(
					StatusCode::INTERNAL_SERVER_ERROR,
					"E-CORE-INTERNAL",
					"Internal server error".to_string(),
				)
			}
			Error::SubstrateError(msg) => {
				warn!("substrate error: {}", msg);
				(
					StatusCode::SERVICE_UNAVAILABLE,
					"E-SYS-UNAVAIL",
					"Service temporarily unavailable".to_string(),
				)
			}
			Error::SubstrateFatal(msg) => {
				warn!("substrate fatal: {}", msg);
				(
					StatusCode::SERVICE_UNAVAILABLE,
					"E-SYS-UNAVAIL",
					"Service temporarily unavailable".to_string(),
				)
			}
			Error::ConfigError(msg) => {
				warn!("config error: {}", msg);
				(
					StatusCode::INTERNAL_SERVER_ERROR,
					"E-CONF-CFGERR",
					"Internal server error".to_string(),
				)
			}
			Error::Io(_) => {
				(StatusCode::INTERNAL_SERVER_ERROR, "E-SYS-IO", "Internal server error".to_string())
			}
		};

		let body = ErrorResponse::new(code, message);
		(status, Json(body)).into_response()
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		warn!("io error: {}", err);
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		warn!("json error: {}", err);
		Self::Parse
	}
}

impl From<base64::DecodeError> for Error {
	fn from(err: base64::DecodeError) -> Self {
		warn!("base64 decode error: {}", err);
		Self::ProtocolError("invalid base64 payload".into())
	}
}

impl From<redis::RedisError> for Error {
	fn from(err: redis::RedisError) -> Self {
		warn!("redis error: {}", err);
		Self::SubstrateError(err.to_string())
	}
}

impl From<axum::Error> for Error {
	fn from(err: axum::Error) -> Self {
		warn!("websocket error: {}", err);
		Self::Internal("websocket send failed".into())
	}
}

impl From<tokio::task::JoinError> for Error {
	fn from(err: tokio::task::JoinError) -> Self {
		warn!("tokio join error: {}", err);
		Self::Internal("task execution failed".into())
	}
}

// vim: ts=4
