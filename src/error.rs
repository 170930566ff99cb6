// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Error taxonomy for naming operations and its wire encoding.
// Author: Lukas Bower

use std::error::Error as StdError;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::binding::NamingObject;
use crate::name::Name;

/// Boxed cause carried by communication failures.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Resolution state handed to an outer resolver when a federated namespace
/// root is reached before the name is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Continuation {
    /// The federation reference that stopped resolution.
    pub resolved: NamingObject,
    /// Name still to be resolved in the foreign namespace.
    pub remaining: Name,
}

/// Errors surfaced by naming operations.
#[derive(Debug, Error)]
pub enum NamingError {
    /// Empty or malformed name supplied to an operation.
    #[error("invalid name: {0}")]
    InvalidName(String),
    /// No binding exists for the name.
    #[error("{0}")]
    NameNotFound(String),
    /// A binding already exists for the name.
    #[error("{0} is already bound")]
    NameAlreadyBound(String),
    /// A value that is not a context was met while traversing a name.
    #[error("{0}")]
    NotContext(String),
    /// Attempted to remove a subcontext that still holds bindings.
    #[error("context not empty: {0}")]
    ContextNotEmpty(String),
    /// Connect, read, or discovery failure.
    #[error("{message}")]
    CommunicationFailure {
        /// Description of the failed exchange.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<BoxError>,
    },
    /// The remote tree instance behind a cached handle was recycled.
    #[error("stale naming handle: {0}")]
    StaleHandle(String),
    /// The server refused the connection.
    #[error("connection refused by {target}")]
    ConnectRefused {
        /// Endpoint that refused.
        target: String,
        /// Socket error reported by the connect.
        #[source]
        source: io::Error,
    },
    /// The object-reconstruction hook could not find a named factory.
    #[error(
        "Could not obtain ObjectFactory implementation referenced from naming at \"{target}\"; \
         perhaps missing from the registry?: {factory}"
    )]
    MissingFactory {
        /// Factory named by the reference.
        factory: String,
        /// Name the reference was bound under.
        target: String,
    },
    /// The permission checker rejected the operation.
    #[error("permission denied: {actions} on {path}")]
    PermissionDenied {
        /// Absolute path of the candidate permission.
        path: String,
        /// Action names of the candidate permission.
        actions: String,
    },
    /// Resolution must continue in a federated namespace.
    #[error("{}", describe(.0))]
    CannotProceed(Box<Continuation>),
    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The handle does not support the requested operation.
    #[error("operation not supported: {0}")]
    OperationNotSupported(String),
    /// Value or frame encoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

fn describe(continuation: &Continuation) -> String {
    let resolved = match &continuation.resolved {
        NamingObject::Reference(reference) => reference.class_name.as_str(),
        other => other.class_name(),
    };
    format!(
        "cannot proceed past {resolved}; remaining name {}",
        continuation.remaining
    )
}

impl NamingError {
    /// Build a communication failure with an optional cause.
    pub fn communication(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::CommunicationFailure {
            message: message.into(),
            source,
        }
    }

    /// Build a communication failure from an I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::communication(message, Some(Box::new(source)))
    }

    /// Whether the error signals a recycled remote instance.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleHandle(_))
    }

    /// Whether the error is a refused connection eligible for retry.
    #[must_use]
    pub fn is_connect_refused(&self) -> bool {
        matches!(self, Self::ConnectRefused { .. })
    }
}

/// Error shape carried in reply frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFault {
    /// See [`NamingError::InvalidName`].
    InvalidName {
        /// Detail.
        message: String,
    },
    /// See [`NamingError::NameNotFound`].
    NameNotFound {
        /// Detail.
        message: String,
    },
    /// See [`NamingError::NameAlreadyBound`].
    NameAlreadyBound {
        /// Detail.
        message: String,
    },
    /// See [`NamingError::NotContext`].
    NotContext {
        /// Detail.
        message: String,
    },
    /// See [`NamingError::ContextNotEmpty`].
    ContextNotEmpty {
        /// Detail.
        message: String,
    },
    /// See [`NamingError::PermissionDenied`].
    PermissionDenied {
        /// Candidate path.
        path: String,
        /// Candidate actions.
        actions: String,
    },
    /// See [`NamingError::CannotProceed`].
    CannotProceed {
        /// Continuation to resume from.
        continuation: Continuation,
    },
    /// See [`NamingError::MissingFactory`].
    MissingFactory {
        /// Factory name.
        factory: String,
        /// Target name.
        target: String,
    },
    /// See [`NamingError::OperationNotSupported`].
    OperationNotSupported {
        /// Detail.
        message: String,
    },
    /// The request addressed a tree instance the server no longer hosts.
    NoSuchObject {
        /// Instance the client asked for.
        requested: u64,
    },
    /// Any other server-side failure.
    Internal {
        /// Detail.
        message: String,
    },
}

impl From<&NamingError> for WireFault {
    fn from(error: &NamingError) -> Self {
        match error {
            NamingError::InvalidName(message) => Self::InvalidName {
                message: message.clone(),
            },
            NamingError::NameNotFound(message) => Self::NameNotFound {
                message: message.clone(),
            },
            NamingError::NameAlreadyBound(message) => Self::NameAlreadyBound {
                message: message.clone(),
            },
            NamingError::NotContext(message) => Self::NotContext {
                message: message.clone(),
            },
            NamingError::ContextNotEmpty(message) => Self::ContextNotEmpty {
                message: message.clone(),
            },
            NamingError::PermissionDenied { path, actions } => Self::PermissionDenied {
                path: path.clone(),
                actions: actions.clone(),
            },
            NamingError::CannotProceed(continuation) => Self::CannotProceed {
                continuation: (**continuation).clone(),
            },
            NamingError::MissingFactory { factory, target } => Self::MissingFactory {
                factory: factory.clone(),
                target: target.clone(),
            },
            NamingError::OperationNotSupported(message) => Self::OperationNotSupported {
                message: message.clone(),
            },
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

impl From<WireFault> for NamingError {
    fn from(fault: WireFault) -> Self {
        match fault {
            WireFault::InvalidName { message } => Self::InvalidName(message),
            WireFault::NameNotFound { message } => Self::NameNotFound(message),
            WireFault::NameAlreadyBound { message } => Self::NameAlreadyBound(message),
            WireFault::NotContext { message } => Self::NotContext(message),
            WireFault::ContextNotEmpty { message } => Self::ContextNotEmpty(message),
            WireFault::PermissionDenied { path, actions } => {
                Self::PermissionDenied { path, actions }
            }
            WireFault::CannotProceed { continuation } => Self::CannotProceed(Box::new(continuation)),
            WireFault::MissingFactory { factory, target } => {
                Self::MissingFactory { factory, target }
            }
            WireFault::OperationNotSupported { message } => Self::OperationNotSupported(message),
            WireFault::NoSuchObject { requested } => {
                Self::StaleHandle(format!("no such naming instance {requested:#x}"))
            }
            WireFault::Internal { message } => Self::communication(message, None),
        }
    }
}
