//! # Session Error Types
//!
//! Errors raised by the session layer and the distributed store.

use thiserror::Error;

/// Distributed store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Redis command or connection failure.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Record (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The call exceeded the configured timeout.
    #[error("Store operation timed out: {op}")]
    Timeout { op: &'static str },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Protocol session errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Unknown both locally and in the distributed store.
    #[error("Session not found: {id}")]
    NotFound { id: String },

    /// The session is alive on another instance.
    #[error("Session {id} is owned by another instance")]
    ForeignSession { id: String },

    /// Dispatch failed internally; details are only logged.
    #[error("Internal dispatch error: {message}")]
    InternalDispatch { message: String },
}

impl SessionError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn foreign(id: impl Into<String>) -> Self {
        Self::ForeignSession { id: id.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalDispatch {
            message: message.into(),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Failure reported by a [`crate::MessageHandler`].
#[derive(Error, Debug)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
