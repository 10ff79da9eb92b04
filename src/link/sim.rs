//! # In-process simulated broker.
//!
//! [`SimFactory`] hands out [`SimConnection`]s backed by shared [`SimBroker`]
//! handles. A test (or the demo) keeps the broker handle to script outages,
//! inject publishes, and count calls:
//!
//! ```text
//! let factory = SimFactory::new();
//! let broker = factory.add("edge");
//! broker.fail_connects(2);          // next two connect() calls fail
//! broker.publish("sensors/t", b"21");
//! broker.drop_sessions();           // every open session reports not-connected
//! broker.panic_pumps(1);            // next pump_once() panics
//! assert_eq!(broker.connect_calls(), 3);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::LinkError;
use crate::link::{
    AuthSettings, ConnectSettings, Connection, ConnectionFactory, Message, OnMessage, QoS,
};

#[derive(Default)]
struct BrokerState {
    epoch: u64,
    outage: bool,
    connect_failures: u32,
    subscribe_failures: u32,
    pump_failures: u32,
    connect_panics: u32,
    pump_panics: u32,
    disconnect_fails: bool,
    pending: VecDeque<Message>,

    created: u32,
    connect_calls: u32,
    subscribe_calls: u32,
    pump_calls: u32,
    disconnect_calls: u32,
    last_filter: Option<String>,
    last_qos: Option<QoS>,
    last_clean_session: Option<bool>,
    last_settings: Option<ConnectSettings>,
}

/// Scriptable broker shared by every connection created for one name.
#[derive(Clone, Default)]
pub struct SimBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl SimBroker {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes the next `n` connect attempts fail.
    pub fn fail_connects(&self, n: u32) {
        self.lock().connect_failures = n;
    }

    /// While `down`, every connect attempt fails.
    pub fn set_outage(&self, down: bool) {
        self.lock().outage = down;
    }

    /// Makes the next `n` subscribe calls fail.
    pub fn fail_subscribes(&self, n: u32) {
        self.lock().subscribe_failures = n;
    }

    /// Makes the next `n` pump calls fail.
    pub fn fail_pumps(&self, n: u32) {
        self.lock().pump_failures = n;
    }

    /// Makes the next `n` connect attempts panic.
    pub fn panic_connects(&self, n: u32) {
        self.lock().connect_panics = n;
    }

    /// Makes the next `n` pump calls panic.
    pub fn panic_pumps(&self, n: u32) {
        self.lock().pump_panics = n;
    }

    /// Makes every disconnect call return an error (the session still closes).
    pub fn fail_disconnects(&self, fail: bool) {
        self.lock().disconnect_fails = fail;
    }

    /// Invalidates every open session.
    pub fn drop_sessions(&self) {
        self.lock().epoch += 1;
    }

    /// Queues a publish. The next successful pump of a subscribed session
    /// delivers it if the filter matches and discards it otherwise.
    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.lock().pending.push_back(Message::new(topic, payload));
    }

    /// Publishes not yet taken by a pump.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Connections created by the factory.
    pub fn created(&self) -> u32 {
        self.lock().created
    }

    /// Connect attempts, successful or not.
    pub fn connect_calls(&self) -> u32 {
        self.lock().connect_calls
    }

    /// Subscribe calls, successful or not.
    pub fn subscribe_calls(&self) -> u32 {
        self.lock().subscribe_calls
    }

    /// Pump calls, successful or not.
    pub fn pump_calls(&self) -> u32 {
        self.lock().pump_calls
    }

    /// Disconnect calls.
    pub fn disconnect_calls(&self) -> u32 {
        self.lock().disconnect_calls
    }

    /// Filter of the most recent subscribe call.
    pub fn last_filter(&self) -> Option<String> {
        self.lock().last_filter.clone()
    }

    /// QoS of the most recent subscribe call.
    pub fn last_qos(&self) -> Option<QoS> {
        self.lock().last_qos
    }

    /// Clean-session flag of the most recent connect call.
    pub fn last_clean_session(&self) -> Option<bool> {
        self.lock().last_clean_session
    }

    /// Settings passed to the most recent connect call.
    pub fn last_settings(&self) -> Option<ConnectSettings> {
        self.lock().last_settings.clone()
    }
}

/// Connection to a [`SimBroker`].
pub struct SimConnection {
    broker: SimBroker,
    session: Option<u64>,
    subscription: Option<(String, OnMessage)>,
}

impl SimConnection {
    /// Creates a disconnected connection.
    pub fn new(broker: SimBroker) -> Self {
        Self {
            broker,
            session: None,
            subscription: None,
        }
    }

    fn connected_in(&self, state: &BrokerState) -> bool {
        self.session == Some(state.epoch)
    }
}

#[async_trait]
impl Connection for SimConnection {
    async fn connect(
        &mut self,
        settings: Option<&ConnectSettings>,
        clean_session: bool,
    ) -> Result<(), LinkError> {
        let mut state = self.broker.lock();
        state.connect_calls += 1;
        state.last_clean_session = Some(clean_session);
        state.last_settings = settings.cloned();

        if state.connect_panics > 0 {
            state.connect_panics -= 1;
            drop(state);
            panic!("sim broker: connect panicked");
        }

        if state.outage {
            return Err(LinkError::Connect {
                reason: "broker unreachable".into(),
            });
        }
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(LinkError::Connect {
                reason: "connection refused".into(),
            });
        }
        self.session = Some(state.epoch);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        let mut state = self.broker.lock();
        state.disconnect_calls += 1;
        self.session = None;
        self.subscription = None;

        if state.disconnect_fails {
            return Err(LinkError::Disconnect {
                reason: "socket already closed".into(),
            });
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let state = self.broker.lock();
        self.connected_in(&state)
    }

    async fn subscribe(
        &mut self,
        filter: &str,
        on_message: OnMessage,
        qos: QoS,
    ) -> Result<(), LinkError> {
        let mut state = self.broker.lock();
        state.subscribe_calls += 1;
        state.last_filter = Some(filter.to_string());
        state.last_qos = Some(qos);

        if !self.connected_in(&state) {
            return Err(LinkError::Subscribe {
                reason: "not connected".into(),
            });
        }
        if state.subscribe_failures > 0 {
            state.subscribe_failures -= 1;
            return Err(LinkError::Subscribe {
                reason: "not authorized".into(),
            });
        }
        self.subscription = Some((filter.to_string(), on_message));
        Ok(())
    }

    async fn pump_once(&mut self) -> Result<(), LinkError> {
        let delivered = {
            let mut state = self.broker.lock();
            state.pump_calls += 1;

            if state.pump_panics > 0 {
                state.pump_panics -= 1;
                drop(state);
                panic!("sim broker: pump panicked");
            }

            if !self.connected_in(&state) {
                return Err(LinkError::Pump {
                    reason: "not connected".into(),
                });
            }
            if state.pump_failures > 0 {
                state.pump_failures -= 1;
                return Err(LinkError::Pump {
                    reason: "malformed packet".into(),
                });
            }

            let Some((filter, _)) = &self.subscription else {
                return Ok(());
            };
            state
                .pending
                .drain(..)
                .filter(|m| topic_matches(filter, &m.topic))
                .collect::<Vec<_>>()
        };

        if let Some((_, on_message)) = &self.subscription {
            for message in delivered {
                on_message(message);
            }
        }
        Ok(())
    }
}

/// Hands out [`SimConnection`]s for registered names.
#[derive(Default)]
pub struct SimFactory {
    brokers: Mutex<HashMap<String, (SimBroker, AuthSettings)>>,
}

impl SimFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` with default auth settings and returns its broker.
    pub fn add(&self, name: impl Into<String>) -> SimBroker {
        self.add_with_auth(name, AuthSettings::default())
    }

    /// Registers `name` with explicit auth settings and returns its broker.
    pub fn add_with_auth(&self, name: impl Into<String>, auth: AuthSettings) -> SimBroker {
        let broker = SimBroker::default();
        self.brokers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), (broker.clone(), auth));
        broker
    }

    /// Broker registered under `name`.
    pub fn broker(&self, name: &str) -> Option<SimBroker> {
        self.brokers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|(broker, _)| broker.clone())
    }

    fn entry(&self, name: &str) -> Result<(SimBroker, AuthSettings), LinkError> {
        self.brokers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| LinkError::UnknownConnection {
                name: name.to_string(),
            })
    }
}

impl ConnectionFactory for SimFactory {
    fn create(&self, name: &str) -> Result<Box<dyn Connection>, LinkError> {
        let (broker, _) = self.entry(name)?;
        broker.lock().created += 1;
        Ok(Box::new(SimConnection::new(broker)))
    }

    fn auth_settings(&self, name: &str) -> Result<AuthSettings, LinkError> {
        self.entry(name).map(|(_, auth)| auth)
    }
}

/// MQTT-style filter matching (`+` one level, trailing `#` any remainder).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut levels = topic.split('/');
    for part in filter.split('/') {
        match part {
            "#" => return true,
            "+" => {
                if levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    levels.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("#", "a/b/c"));
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/+", "a"));
        assert!(!topic_matches("x/#", "a/b"));
    }

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let factory = SimFactory::new();
        let broker = factory.add("edge");
        broker.fail_connects(1);

        let mut conn = factory.create("edge").unwrap();
        assert!(conn.connect(None, true).await.is_err());
        assert!(!conn.is_connected());
        conn.connect(None, true).await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(broker.connect_calls(), 2);

        broker.drop_sessions();
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_pump_delivers_matching_and_discards_the_rest() {
        let factory = SimFactory::new();
        let broker = factory.add("edge");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut conn = factory.create("edge").unwrap();
        conn.connect(None, true).await.unwrap();
        conn.subscribe(
            "sensors/#",
            Arc::new(move |m: Message| sink.lock().unwrap().push(m.topic)),
            QoS::AtLeastOnce,
        )
        .await
        .unwrap();

        broker.publish("sensors/t1", b"1".to_vec());
        broker.publish("other/t2", b"2".to_vec());
        conn.pump_once().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["sensors/t1".to_string()]);
        assert_eq!(broker.last_qos(), Some(QoS::AtLeastOnce));
        assert_eq!(broker.pending(), 0);

        for i in 0..100 {
            broker.publish(format!("other/{i}"), b"x".to_vec());
        }
        conn.pump_once().await.unwrap();
        assert_eq!(broker.pending(), 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_name() {
        let factory = SimFactory::new();
        assert!(matches!(
            factory.auth_settings("nope"),
            Err(LinkError::UnknownConnection { .. })
        ));
    }
}
