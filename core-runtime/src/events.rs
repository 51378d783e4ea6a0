//! # Event Bus System
//!
//! Broadcasts typed session and sync events using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: `AuthEvent` for the session lifecycle, `SyncEvent` for
//!   offline queue drains
//! - **EventBus**: central broadcast channel for publishing events
//! - **EventStream**: receiver wrapper with optional filtering
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ Refresh      ├──────────────>│           │     subscribe    ┌────────────┐
//! │ coordinator  │               │ EventBus  ├─────────────────>│ UI / shell │
//! └──────────────┘               │ (broadcast│                  └────────────┘
//! ┌──────────────┐     emit      │  channel) │
//! │ Sync queue   ├──────────────>│           │
//! └──────────────┘               └───────────┘
//! ```
//!
//! Emitting never fails an operation. With no subscribers the event is
//! discarded.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus.emit(CoreEvent::Auth(AuthEvent::SignedOut)).ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event, CoreEvent::Auth(AuthEvent::SignedOut));
//! # }
//! ```
//!
//! Subscribers that fall behind receive `RecvError::Lagged(n)` and may keep
//! reading; `RecvError::Closed` means every sender was dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Auth(AuthEvent),
    Sync(SyncEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::SessionExpired { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::ItemDropped { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::SignedIn) | CoreEvent::Auth(AuthEvent::SignedOut) => {
                EventSeverity::Info
            }
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Session lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// Tokens were stored after login, registration or MFA verification.
    SignedIn,
    /// The user logged out or deleted the account.
    SignedOut,
    /// A refresh call is about to be sent.
    TokenRefreshing,
    TokenRefreshed {
        /// Expiry of the new access token (Unix epoch seconds), when known.
        expires_at: Option<i64>,
    },
    /// Stored tokens were cleared; the user must sign in again.
    SessionExpired {
        reason: String,
    },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::SignedIn => "User signed in",
            AuthEvent::SignedOut => "User signed out",
            AuthEvent::TokenRefreshing => "Refreshing access token",
            AuthEvent::TokenRefreshed { .. } => "Token refreshed successfully",
            AuthEvent::SessionExpired { .. } => "Session expired",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Offline queue drain events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A drain began with `pending` queued items.
    Started { pending: usize },
    /// An item reached the retry ceiling and was removed without being applied.
    ItemDropped {
        item_id: String,
        endpoint: String,
        retry_count: u32,
    },
    /// A drain finished.
    Completed {
        processed: usize,
        failed: usize,
        dropped: usize,
        /// Items still queued, including ones enqueued during the drain.
        remaining: usize,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::ItemDropped { .. } => "Queued change dropped after repeated failures",
            SyncEvent::Completed { .. } => "Sync completed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus shares the underlying channel. Each `subscribe()` creates
/// an independent receiver that sees only future events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error when there are none. Producers typically discard the result.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::default();
/// let sync_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Sync(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
