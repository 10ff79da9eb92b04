//! Error types used by the supervision runtime and its collaborators.
//!
//! The taxonomy follows how failures are handled, not where they come from:
//!
//! - [`ConfigError`] invalid settings or unknown connections; raised at construction, never retried.
//! - [`LinkError`] failures reported by a [`Connection`](crate::link::Connection) or its factory.
//!   Connect/subscribe failures feed the worker's backoff clock; pump failures are operational.
//! - [`StoreError`] failures of the liveness repository or the health store.
//! - [`NotifyError`] a notification sink rejected an inbound message.
//! - [`RuntimeError`] failures of the coordinator itself (signal setup, a failed tick).
//!
//! Every enum provides `as_label` for logs.

use thiserror::Error;

/// # Configuration errors.
///
/// Returned by constructors and settings loaders. These are programming or
/// deployment mistakes: retrying cannot fix them.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The connection factory does not know the requested connection name.
    #[error("connection `{name}` is not configured")]
    UnknownConnection {
        /// Requested connection name.
        name: String,
    },

    /// A policy or settings value is out of range.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Settings sources could not be read or deserialized.
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
}

impl ConfigError {
    /// Shorthand for [`ConfigError::Invalid`].
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use brokervisor::ConfigError;
    ///
    /// let err = ConfigError::UnknownConnection { name: "edge".into() };
    /// assert_eq!(err.as_label(), "config_unknown_connection");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::UnknownConnection { .. } => "config_unknown_connection",
            ConfigError::Invalid { .. } => "config_invalid",
            ConfigError::Load(_) => "config_load",
        }
    }
}

/// # Errors raised by connections and the connection factory.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The factory has no connection with this name.
    #[error("unknown connection `{name}`")]
    UnknownConnection {
        /// Requested connection name.
        name: String,
    },

    /// Establishing the session failed.
    #[error("connect failed: {reason}")]
    Connect {
        /// Underlying cause.
        reason: String,
    },

    /// The broker refused the subscription.
    #[error("subscribe failed: {reason}")]
    Subscribe {
        /// Underlying cause.
        reason: String,
    },

    /// One iteration of the event loop failed.
    #[error("event loop failed: {reason}")]
    Pump {
        /// Underlying cause.
        reason: String,
    },

    /// Closing the session failed.
    #[error("disconnect failed: {reason}")]
    Disconnect {
        /// Underlying cause.
        reason: String,
    },
}

impl LinkError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            LinkError::UnknownConnection { .. } => "link_unknown_connection",
            LinkError::Connect { .. } => "link_connect",
            LinkError::Subscribe { .. } => "link_subscribe",
            LinkError::Pump { .. } => "link_pump",
            LinkError::Disconnect { .. } => "link_disconnect",
        }
    }

    /// Indicates whether the worker's backoff clock should handle this error.
    ///
    /// # Example
    /// ```
    /// use brokervisor::LinkError;
    ///
    /// assert!(LinkError::Connect { reason: "refused".into() }.is_retryable());
    /// assert!(!LinkError::UnknownConnection { name: "edge".into() }.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, LinkError::Connect { .. } | LinkError::Subscribe { .. })
    }
}

/// # Errors raised by the liveness repository and the health store.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend could not be reached or refused the operation.
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Underlying cause.
        reason: String,
    },

    /// A record could not be converted to or from its field map.
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Unavailable { .. } => "store_unavailable",
            StoreError::Malformed(_) => "store_malformed",
        }
    }
}

/// # Errors raised by a notification sink.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The sink refused or failed to process the message.
    #[error("notification rejected: {reason}")]
    Rejected {
        /// Underlying cause.
        reason: String,
    },

    /// The sink's downstream receiver is gone.
    #[error("notification channel closed")]
    Closed,
}

impl NotifyError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            NotifyError::Rejected { .. } => "notify_rejected",
            NotifyError::Closed => "notify_closed",
        }
    }
}

/// # Errors produced by the coordinator runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// OS signal handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    Signals(#[from] std::io::Error),

    /// Persisting coordinator state failed.
    #[error("failed to persist state: {0}")]
    Persist(#[from] StoreError),

    /// A tick panicked; the payload message is preserved.
    #[error("tick panicked: {info}")]
    Panicked {
        /// Panic message, if it was a string.
        info: String,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use brokervisor::RuntimeError;
    ///
    /// let err = RuntimeError::Panicked { info: "boom".into() };
    /// assert_eq!(err.as_label(), "runtime_panicked");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Signals(_) => "runtime_signals",
            RuntimeError::Persist(_) => "runtime_persist",
            RuntimeError::Panicked { .. } => "runtime_panicked",
        }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connect_and_subscribe_are_retryable() {
        assert!(LinkError::Connect { reason: "x".into() }.is_retryable());
        assert!(LinkError::Subscribe { reason: "x".into() }.is_retryable());
        assert!(!LinkError::Pump { reason: "x".into() }.is_retryable());
        assert!(!LinkError::Disconnect { reason: "x".into() }.is_retryable());
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static boom");
        assert_eq!(panic_message(boxed.as_ref()), "static boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(boxed.as_ref()), "owned boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn test_store_error_wraps_into_runtime_error() {
        let err: RuntimeError = StoreError::Unavailable {
            reason: "down".into(),
        }
        .into();
        assert_eq!(err.as_label(), "runtime_persist");
        assert!(err.to_string().contains("down"));
    }
}
