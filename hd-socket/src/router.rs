//! Topic router: topic -> ordered handler registrations.
//!
//! The router never touches the transport. It tracks which topics have at
//! least one registration and wakes the connection manager when that set
//! changes, so the manager can wire or release the topic on the wire.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use hd_core::error::{HdError, HdResult};

use crate::lock;

/// Callback invoked with the decoded JSON payload of a frame.
pub type Handler = Arc<dyn Fn(&Value) -> HdResult<()> + Send + Sync>;

/// Opaque identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Registration {
    id: SubscriptionId,
    handler: Handler,
}

struct RouterShared {
    topics: Mutex<HashMap<String, Vec<Registration>>>,
    changed: Notify,
}

impl RouterShared {
    fn remove(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut topics = lock(&self.topics);
        let Some(regs) = topics.get_mut(topic) else {
            return false;
        };
        let before = regs.len();
        regs.retain(|r| r.id != id);
        let removed = regs.len() != before;
        if regs.is_empty() {
            topics.remove(topic);
            drop(topics);
            debug!("last handler left {topic}");
            self.changed.notify_one();
        }
        removed
    }
}

/// Shared handle to the routing table.
#[derive(Clone)]
pub struct TopicRouter {
    shared: Arc<RouterShared>,
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicRouter {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RouterShared {
                topics: Mutex::new(HashMap::new()),
                changed: Notify::new(),
            }),
        }
    }

    /// Register a handler for `topic`. Dropping the returned handle removes it.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Value) -> HdResult<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        let first = {
            let mut topics = lock(&self.shared.topics);
            let regs = topics.entry(topic.to_string()).or_default();
            regs.push(Registration {
                id,
                handler: Arc::new(handler),
            });
            regs.len() == 1
        };
        if first {
            debug!("first handler joined {topic}");
            self.shared.changed.notify_one();
        }
        SubscriptionHandle {
            router: Arc::downgrade(&self.shared),
            topic: topic.to_string(),
            id,
            active: true,
        }
    }

    /// Register a handler that receives the payload deserialized as `T`.
    ///
    /// Payloads that do not match `T` are reported as `HdError::Payload`
    /// and never reach the handler.
    pub fn subscribe_as<T, F>(&self, topic: &str, handler: F) -> SubscriptionHandle
    where
        T: DeserializeOwned,
        F: Fn(T) -> HdResult<()> + Send + Sync + 'static,
    {
        let owned_topic = topic.to_string();
        self.subscribe(topic, move |value| {
            let payload = T::deserialize(value).map_err(|e| HdError::Payload {
                topic: owned_topic.clone(),
                message: e.to_string(),
            })?;
            handler(payload)
        })
    }

    /// Fan a raw frame body out to every handler registered for `topic`,
    /// in registration order. Returns how many handlers succeeded.
    pub fn dispatch(&self, topic: &str, body: &str) -> usize {
        let handlers: Vec<Handler> = {
            let topics = lock(&self.shared.topics);
            match topics.get(topic) {
                Some(regs) => regs.iter().map(|r| Arc::clone(&r.handler)).collect(),
                None => {
                    debug!("no handlers for {topic}, frame dropped");
                    return 0;
                }
            }
        };

        let value = match parse_body(body) {
            Ok(v) => v,
            Err(e) => {
                warn!("dropping malformed payload on {topic}: {e}");
                return 0;
            }
        };

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&value))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!("handler for {topic} failed: {e}"),
                Err(_) => warn!("handler for {topic} panicked"),
            }
        }
        delivered
    }

    /// Topics that currently have at least one registration, sorted.
    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = lock(&self.shared.topics).keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Number of registrations on `topic`.
    pub fn handler_count(&self, topic: &str) -> usize {
        lock(&self.shared.topics).get(topic).map_or(0, Vec::len)
    }

    /// Resolves after the set of active topics may have changed.
    pub(crate) async fn changed(&self) {
        self.shared.changed.notified().await;
    }
}

/// Empty bodies decode as JSON null so that signal-only frames still fan out.
fn parse_body(body: &str) -> HdResult<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(body)?)
}

/// Keeps one registration alive.
#[must_use = "dropping the handle unsubscribes immediately"]
pub struct SubscriptionHandle {
    router: Weak<RouterShared>,
    topic: String,
    id: SubscriptionId,
    active: bool,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove this registration. Calling it again is a no-op.
    pub fn unsubscribe(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(router) = self.router.upgrade() {
            router.remove(&self.topic, self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
