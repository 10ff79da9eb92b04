//! # Broker connections.
//!
//! The supervisor never speaks a wire protocol itself. It drives an opaque
//! [`Connection`] produced by a [`ConnectionFactory`]:
//!
//! ```text
//! ConnectionFactory::create(name) ──► Box<dyn Connection>   (not connected yet)
//! ConnectionFactory::auth_settings(name) ──► AuthSettings   (credentials, TLS, clean session)
//!
//! Worker tick:
//!   connect(settings, clean_session)
//!   subscribe(filter, on_message, qos)
//!   pump_once() ──► on_message(Message) for every inbound publish
//!   is_connected()  checked at the top of every tick
//!   disconnect()    on terminate (best effort)
//! ```
//!
//! Timeouts of individual calls belong to the connection implementation; the
//! supervisor only keeps its own backoff clock.
//!
//! [`sim`] contains an in-process broker used by tests and demos.

pub mod sim;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::LinkError;

/// Delivery guarantee requested for a subscription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub enum QoS {
    /// QoS 0.
    #[default]
    AtMostOnce,
    /// QoS 1.
    AtLeastOnce,
    /// QoS 2.
    ExactlyOnce,
}

impl QoS {
    /// Numeric level (0, 1 or 2).
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("qos must be 0, 1 or 2, got {other}")),
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// Inbound publish delivered by a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Topic the message was published on.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Callback a connection invokes for every inbound message.
///
/// Must not block: the worker's callback only enqueues.
pub type OnMessage = Arc<dyn Fn(Message) + Send + Sync>;

/// Credentials and transport options for one connection.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectSettings {
    /// Username, if the broker requires authentication.
    pub username: Option<String>,
    /// Password, if the broker requires authentication.
    pub password: Option<String>,
    /// Whether to wrap the transport in TLS.
    pub use_tls: bool,
    /// Keep-alive interval in seconds (`0` = implementation default).
    pub keep_alive_secs: u16,
}

impl fmt::Debug for ConnectSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectSettings")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("use_tls", &self.use_tls)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .finish()
    }
}

/// What the factory knows about how to connect a named connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthSettings {
    /// Connection settings; `None` means connect with library defaults.
    pub settings: Option<ConnectSettings>,
    /// Whether to request a clean session.
    pub clean_session: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            settings: None,
            clean_session: true,
        }
    }
}

/// A single broker session.
///
/// Implementations decide their own timeouts; a call that hangs stalls only the
/// worker that owns the connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Establishes the session.
    async fn connect(
        &mut self,
        settings: Option<&ConnectSettings>,
        clean_session: bool,
    ) -> Result<(), LinkError>;

    /// Closes the session.
    async fn disconnect(&mut self) -> Result<(), LinkError>;

    /// Whether the session is currently usable.
    fn is_connected(&self) -> bool;

    /// Subscribes to `filter`; inbound messages are handed to `on_message`.
    async fn subscribe(
        &mut self,
        filter: &str,
        on_message: OnMessage,
        qos: QoS,
    ) -> Result<(), LinkError>;

    /// Runs one bounded iteration of the event loop.
    async fn pump_once(&mut self) -> Result<(), LinkError>;
}

/// Produces connections by name.
pub trait ConnectionFactory: Send + Sync {
    /// Returns a new, not yet connected connection.
    fn create(&self, name: &str) -> Result<Box<dyn Connection>, LinkError>;

    /// Returns connection settings for `name`.
    ///
    /// Unknown names must yield [`LinkError::UnknownConnection`].
    fn auth_settings(&self, name: &str) -> Result<AuthSettings, LinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_from_level() {
        assert_eq!(QoS::try_from(0), Ok(QoS::AtMostOnce));
        assert_eq!(QoS::try_from(2), Ok(QoS::ExactlyOnce));
        assert!(QoS::try_from(3).is_err());
        assert_eq!(QoS::AtLeastOnce.to_string(), "1");
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let settings = ConnectSettings {
            username: Some("svc".into()),
            password: Some("hunter2".into()),
            ..ConnectSettings::default()
        };
        let rendered = format!("{settings:?}");
        assert!(rendered.contains("svc"));
        assert!(!rendered.contains("hunter2"));
    }
}
