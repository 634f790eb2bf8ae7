//! In-process event dispatcher
//!
//! Delivers envelopes to registered handlers in a deterministic order:
//! ascending `priority`, ties broken by registration order. Wildcard handlers
//! are merged into the delivery list of every event type.
//!
//! # Failure isolation
//!
//! A failing, panicking, or timed-out handler never makes `publish` fail. The
//! failure is recorded in the [`PublishResult`]; delivery continues unless the
//! failing subscription was registered with `continue_on_error = false`.
//! Only metadata validation and disposal prevent delivery altogether.
//!
//! # Example
//! ```rust
//! use event_bus::{handler_fn, ActorType, BoxError, EventDispatcher, EventEnvelope, EventMetadata,
//!     PublishOptions, SubscribeOptions};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = EventDispatcher::new();
//!
//! dispatcher.subscribe(
//!     "trip.created",
//!     handler_fn(|envelope: EventEnvelope| async move {
//!         println!("trip created by {}", envelope.metadata.actor_id);
//!         Ok::<(), BoxError>(())
//!     }),
//!     SubscribeOptions::default().with_priority(10),
//! )?;
//!
//! let result = dispatcher
//!     .publish(
//!         "trip.created",
//!         json!({"tripId": "trip_1"}),
//!         EventMetadata::new("user-1", ActorType::User, "itineraries"),
//!         PublishOptions::default(),
//!     )
//!     .await?;
//! assert_eq!(result.handlers_succeeded, 1);
//! # Ok(())
//! # }
//! ```

use crate::config::DispatcherConfig;
use crate::handler::{EventHandler, HandlerError};
use crate::{DispatchError, EventEnvelope, EventMetadata, EventPublisher};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Priority given to subscriptions that do not specify one. Lower runs earlier.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Per-handler time budget in milliseconds
pub const DEFAULT_HANDLER_TIMEOUT_MS: u64 = 30_000;

/// Event type used for wildcard registrations
pub const WILDCARD: &str = "*";

/// Options for [`EventDispatcher::subscribe`]
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// `None` uses the dispatcher's configured default
    pub priority: Option<i32>,
    pub continue_on_error: bool,
    /// External id; a UUID is generated when absent
    pub handler_id: Option<String>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            priority: None,
            continue_on_error: true,
            handler_id: None,
        }
    }
}

impl SubscribeOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_handler_id(mut self, handler_id: impl Into<String>) -> Self {
        self.handler_id = Some(handler_id.into());
        self
    }
}

/// Options for [`EventDispatcher::publish`] and [`EventDispatcher::publish_raw`]
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// `None` uses the dispatcher's configured handler timeout
    pub timeout: Option<Duration>,
    /// When false, handlers run on a spawned task and the result is optimistic
    pub await_handlers: bool,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            await_handlers: true,
            correlation_id: None,
            causation_id: None,
        }
    }
}

impl PublishOptions {
    /// Do not wait for handlers. The returned counts are not authoritative.
    pub fn fire_and_forget() -> Self {
        Self {
            await_handlers: false,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }
}

/// One failed handler invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerFailure {
    pub subscription_id: String,
    pub message: String,
    pub timed_out: bool,
}

/// Summary of a publish call
///
/// When `awaited` is false the result was produced before any handler ran:
/// `handlers_succeeded` simply mirrors `handlers_invoked` and `errors` is
/// always empty. Only awaited results are authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    pub event_id: Uuid,
    pub handlers_invoked: usize,
    pub handlers_succeeded: usize,
    pub errors: Vec<HandlerFailure>,
    pub awaited: bool,
}

impl PublishResult {
    fn optimistic(event_id: Uuid, handler_count: usize) -> Self {
        Self {
            event_id,
            handlers_invoked: handler_count,
            handlers_succeeded: handler_count,
            errors: Vec::new(),
            awaited: false,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty() && self.handlers_invoked == self.handlers_succeeded
    }
}

#[derive(Clone)]
struct Registration {
    ordinal: u64,
    subscription_id: String,
    priority: i32,
    continue_on_error: bool,
    handler: Arc<dyn EventHandler>,
}

#[derive(Default)]
struct Registry {
    by_type: HashMap<String, Vec<Registration>>,
    wildcard: Vec<Registration>,
    next_ordinal: u64,
    disposed: bool,
}

impl Registry {
    fn remove_where(&mut self, mut pred: impl FnMut(&Registration) -> bool) -> bool {
        // Oldest registration wins when several share an external id
        let mut best: Option<(Option<String>, usize, u64)> = None;
        for (event_type, regs) in &self.by_type {
            for (idx, reg) in regs.iter().enumerate() {
                if pred(reg) && best.as_ref().map_or(true, |(_, _, o)| reg.ordinal < *o) {
                    best = Some((Some(event_type.clone()), idx, reg.ordinal));
                }
            }
        }
        for (idx, reg) in self.wildcard.iter().enumerate() {
            if pred(reg) && best.as_ref().map_or(true, |(_, _, o)| reg.ordinal < *o) {
                best = Some((None, idx, reg.ordinal));
            }
        }

        match best {
            Some((Some(event_type), idx, _)) => {
                if let Some(regs) = self.by_type.get_mut(&event_type) {
                    regs.remove(idx);
                    if regs.is_empty() {
                        self.by_type.remove(&event_type);
                    }
                }
                true
            }
            Some((None, idx, _)) => {
                self.wildcard.remove(idx);
                true
            }
            None => false,
        }
    }

    fn count_for(&self, event_type: &str) -> usize {
        let specific = if event_type == WILDCARD {
            0
        } else {
            self.by_type.get(event_type).map_or(0, Vec::len)
        };
        specific + self.wildcard.len()
    }
}

struct Inner {
    registry: RwLock<Registry>,
    config: DispatcherConfig,
}

/// Handle returned by [`EventDispatcher::subscribe`]
///
/// Removing through the handle always targets this exact registration, even
/// when other registrations share its external id.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    event_type: String,
    ordinal: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    /// External subscription id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Event type this subscription targets ([`WILDCARD`] for subscribe_all)
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Remove this registration. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let ordinal = self.ordinal;
        let removed = inner.registry.write().remove_where(|r| r.ordinal == ordinal);
        if removed {
            debug!(subscription_id = %self.id, event_type = %self.event_type, "Unsubscribed");
        }
        removed
    }
}

/// In-memory publish/subscribe core
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<Inner>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry.read();
        f.debug_struct("EventDispatcher")
            .field("event_types", &registry.by_type.len())
            .field("wildcard_handlers", &registry.wildcard.len())
            .field("disposed", &registry.disposed)
            .finish()
    }
}

impl EventDispatcher {
    /// Create a dispatcher with default settings (30 s handler timeout,
    /// priority 100)
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Registry::default()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Register a handler for one event type
    pub fn subscribe(
        &self,
        event_type: &str,
        handler: impl EventHandler + 'static,
        options: SubscribeOptions,
    ) -> Result<Subscription, DispatchError> {
        self.register(event_type, Arc::new(handler), options)
    }

    /// Register a handler that receives every event type
    pub fn subscribe_all(
        &self,
        handler: impl EventHandler + 'static,
        options: SubscribeOptions,
    ) -> Result<Subscription, DispatchError> {
        self.register(WILDCARD, Arc::new(handler), options)
    }

    fn register(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<Subscription, DispatchError> {
        let mut registry = self.inner.registry.write();
        if registry.disposed {
            return Err(DispatchError::Disposed);
        }

        let ordinal = registry.next_ordinal;
        registry.next_ordinal += 1;

        let subscription_id = options
            .handler_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let registration = Registration {
            ordinal,
            subscription_id: subscription_id.clone(),
            priority: options.priority.unwrap_or(self.inner.config.default_priority),
            continue_on_error: options.continue_on_error,
            handler,
        };
        let priority = registration.priority;

        if event_type == WILDCARD {
            registry.wildcard.push(registration);
        } else {
            registry
                .by_type
                .entry(event_type.to_string())
                .or_default()
                .push(registration);
        }
        drop(registry);

        debug!(
            subscription_id = %subscription_id,
            event_type = %event_type,
            priority = priority,
            "Subscribed"
        );

        Ok(Subscription {
            id: subscription_id,
            event_type: event_type.to_string(),
            ordinal,
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Remove one registration by external id
    ///
    /// Returns false for unknown ids. When several registrations share the
    /// id, the oldest one is removed.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let removed = self
            .inner
            .registry
            .write()
            .remove_where(|r| r.subscription_id == subscription_id);
        if removed {
            debug!(subscription_id = %subscription_id, "Unsubscribed");
        }
        removed
    }

    /// Whether any handler (specific or wildcard) would receive `event_type`
    pub fn has_subscribers(&self, event_type: &str) -> bool {
        self.subscriber_count(event_type) > 0
    }

    /// Specific-type handlers plus wildcard handlers
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.inner.registry.read().count_for(event_type)
    }

    /// Drop every registration. The dispatcher stays usable.
    pub fn clear(&self) {
        let mut registry = self.inner.registry.write();
        registry.by_type.clear();
        registry.wildcard.clear();
    }

    /// Clear all state and refuse every later subscribe/publish call
    pub fn dispose(&self) {
        let mut registry = self.inner.registry.write();
        if registry.disposed {
            return;
        }
        registry.by_type.clear();
        registry.wildcard.clear();
        registry.disposed = true;
        drop(registry);
        info!("Event dispatcher disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.registry.read().disposed
    }

    /// Validate, wrap, and deliver an event
    ///
    /// Fails only on validation errors or after [`dispose`](Self::dispose).
    /// Handler failures are reported in the returned [`PublishResult`].
    pub async fn publish(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        metadata: EventMetadata,
        options: PublishOptions,
    ) -> Result<PublishResult, DispatchError> {
        self.ensure_active()?;

        let envelope = EventEnvelope::new(event_type, payload, metadata)
            .with_correlation_id(options.correlation_id.clone())
            .with_causation_id(options.causation_id.clone());
        envelope.validate()?;

        self.deliver(envelope, &options).await
    }

    /// Deliver an already-built envelope (replay and forwarding paths)
    ///
    /// The envelope's metadata is still validated.
    pub async fn publish_raw(
        &self,
        envelope: EventEnvelope,
        options: PublishOptions,
    ) -> Result<PublishResult, DispatchError> {
        self.ensure_active()?;
        envelope.validate()?;
        self.deliver(envelope, &options).await
    }

    fn ensure_active(&self) -> Result<(), DispatchError> {
        if self.inner.registry.read().disposed {
            return Err(DispatchError::Disposed);
        }
        Ok(())
    }

    /// Snapshot of handlers for an event type, in delivery order
    fn handlers_for(&self, event_type: &str) -> Vec<Registration> {
        let registry = self.inner.registry.read();
        let mut handlers: Vec<Registration> = registry
            .by_type
            .get(event_type)
            .into_iter()
            .flatten()
            .chain(registry.wildcard.iter())
            .cloned()
            .collect();
        drop(registry);

        // sort_by_key is stable; the ordinal makes cross-list ties explicit
        handlers.sort_by_key(|r| (r.priority, r.ordinal));
        handlers
    }

    async fn deliver(
        &self,
        envelope: EventEnvelope,
        options: &PublishOptions,
    ) -> Result<PublishResult, DispatchError> {
        let handlers = self.handlers_for(&envelope.event_type);
        let timeout = options.timeout.unwrap_or(self.inner.config.handler_timeout);

        debug!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            handlers = handlers.len(),
            await_handlers = options.await_handlers,
            "Publishing event"
        );

        if !options.await_handlers {
            let result = PublishResult::optimistic(envelope.event_id, handlers.len());
            tokio::spawn(async move {
                let outcome = run_handlers(&envelope, &handlers, timeout).await;
                if !outcome.errors.is_empty() {
                    debug!(
                        event_id = %outcome.event_id,
                        failed = outcome.errors.len(),
                        "Background delivery finished with handler errors"
                    );
                }
            });
            return Ok(result);
        }

        Ok(run_handlers(&envelope, &handlers, timeout).await)
    }
}

#[async_trait]
impl EventPublisher for EventDispatcher {
    async fn publish_envelope(
        &self,
        envelope: EventEnvelope,
        options: PublishOptions,
    ) -> Result<PublishResult, DispatchError> {
        self.publish_raw(envelope, options).await
    }
}

async fn run_handlers(
    envelope: &EventEnvelope,
    handlers: &[Registration],
    timeout: Duration,
) -> PublishResult {
    let mut result = PublishResult {
        event_id: envelope.event_id,
        handlers_invoked: 0,
        handlers_succeeded: 0,
        errors: Vec::new(),
        awaited: true,
    };

    for registration in handlers {
        result.handlers_invoked += 1;

        match invoke(registration, envelope, timeout).await {
            Ok(()) => result.handlers_succeeded += 1,
            Err(err) => {
                warn!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    subscription_id = %registration.subscription_id,
                    error = %err,
                    "Event handler failed"
                );
                result.errors.push(HandlerFailure {
                    subscription_id: registration.subscription_id.clone(),
                    message: err.to_string(),
                    timed_out: err.is_timeout(),
                });

                if !registration.continue_on_error {
                    warn!(
                        event_id = %envelope.event_id,
                        subscription_id = %registration.subscription_id,
                        skipped = handlers.len() - result.handlers_invoked,
                        "Stopping delivery after fatal handler failure"
                    );
                    break;
                }
            }
        }
    }

    result
}

async fn invoke(
    registration: &Registration,
    envelope: &EventEnvelope,
    timeout: Duration,
) -> Result<(), HandlerError> {
    let call = AssertUnwindSafe(registration.handler.handle(envelope)).catch_unwind();

    match tokio::time::timeout(timeout, call).await {
        Err(_) => Err(HandlerError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
        Ok(Err(panic)) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
        Ok(Ok(Err(err))) => Err(HandlerError::Failed(err.to_string())),
        Ok(Ok(Ok(()))) => Ok(()),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
