// src/message_bus.rs
//! Process-wide typed message buses.
//!
//! Each message type owns one global bus, created on first use. A cache subscribes an
//! [`Inbox`] for its context; any thread can [`post`](MessageBus::post) and every inbox whose
//! context the message targets receives a copy. The owning thread drains its inbox at its pump
//! points, so all side effects of a message happen on the thread that owns the cache.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::key::UniqueKey;
use crate::resource::ResourceRef;

// ============================================================================
// 1. CONTEXT IDS
// ============================================================================

/// Identifies the rendering context (and thread) that owns a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u32);

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(1);

impl ContextId {
    pub const INVALID: ContextId = ContextId(0);

    pub fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

// ============================================================================
// 2. BUS
// ============================================================================

pub trait BusMessage: Clone + Send + 'static {
    /// Whether an inbox subscribed for `context` should get this message.
    fn should_send(&self, context: ContextId) -> bool;

    /// The global bus for this message type.
    fn bus() -> &'static MessageBus<Self>;
}

struct Subscriber<M> {
    inbox_id: u64,
    context: ContextId,
    sender: Sender<M>,
}

pub struct MessageBus<M> {
    subscribers: Mutex<Vec<Subscriber<M>>>,
    posted: AtomicUsize,
    undelivered: AtomicUsize,
}

static NEXT_INBOX_ID: AtomicU64 = AtomicU64::new(1);

impl<M: BusMessage> MessageBus<M> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            posted: AtomicUsize::new(0),
            undelivered: AtomicUsize::new(0),
        }
    }

    /// Deliver `message` to every matching inbox. Callable from any thread.
    pub fn post(message: M) {
        let bus = M::bus();
        bus.posted.fetch_add(1, Ordering::Relaxed);

        let subscribers = bus.subscribers.lock();
        let targets: Vec<&Subscriber<M>> = subscribers
            .iter()
            .filter(|s| message.should_send(s.context))
            .collect();

        let Some((last, rest)) = targets.split_last() else {
            bus.undelivered.fetch_add(1, Ordering::Relaxed);
            log::trace!("bus message with no matching inbox dropped");
            return;
        };
        // Unbounded channels only fail once the inbox is gone.
        for target in rest {
            let _ = target.sender.send(message.clone());
        }
        let _ = last.sender.send(message);
    }

    pub fn posted(&self) -> usize {
        self.posted.load(Ordering::Relaxed)
    }

    pub fn undelivered(&self) -> usize {
        self.undelivered.load(Ordering::Relaxed)
    }

    pub fn inbox_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn subscribe(&self, context: ContextId) -> (u64, Receiver<M>) {
        // Unbounded: dropping an unref message here would leak its resource.
        let (sender, receiver) = unbounded();
        let inbox_id = NEXT_INBOX_ID.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push(Subscriber {
            inbox_id,
            context,
            sender,
        });
        (inbox_id, receiver)
    }

    fn unsubscribe(&self, inbox_id: u64) {
        self.subscribers.lock().retain(|s| s.inbox_id != inbox_id);
    }
}

impl<M: BusMessage> Default for MessageBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// 3. INBOX
// ============================================================================

/// Receiving end owned by one cache. Unsubscribes on drop.
pub struct Inbox<M: BusMessage> {
    inbox_id: u64,
    context: ContextId,
    receiver: Receiver<M>,
}

impl<M: BusMessage> Inbox<M> {
    pub fn new(context: ContextId) -> Self {
        let (inbox_id, receiver) = M::bus().subscribe(context);
        Self {
            inbox_id,
            context,
            receiver,
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Take everything posted so far without blocking.
    pub fn poll(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl<M: BusMessage> Drop for Inbox<M> {
    fn drop(&mut self) {
        M::bus().unsubscribe(self.inbox_id);
    }
}

// ============================================================================
// 4. MESSAGES
// ============================================================================

/// Hand a reference back to the thread that owns the resource's cache.
#[derive(Debug, Clone)]
pub struct UnrefMessage {
    pub resource: ResourceRef,
    pub context_id: ContextId,
}

impl UnrefMessage {
    pub fn post(resource: ResourceRef, context_id: ContextId) {
        MessageBus::post(Self {
            resource,
            context_id,
        });
    }
}

impl BusMessage for UnrefMessage {
    fn should_send(&self, context: ContextId) -> bool {
        self.context_id == context
    }

    fn bus() -> &'static MessageBus<Self> {
        static BUS: OnceLock<MessageBus<UnrefMessage>> = OnceLock::new();
        BUS.get_or_init(MessageBus::new)
    }
}

/// The content behind a unique key is stale; the owning cache should drop the key.
#[derive(Debug, Clone)]
pub struct UniqueKeyInvalidatedMessage {
    pub key: UniqueKey,
    pub context_id: ContextId,
    /// Also remove the key from the cache's thread-safe cache.
    pub in_thread_safe_cache: bool,
}

impl UniqueKeyInvalidatedMessage {
    pub fn post(key: UniqueKey, context_id: ContextId, in_thread_safe_cache: bool) {
        MessageBus::post(Self {
            key,
            context_id,
            in_thread_safe_cache,
        });
    }
}

impl BusMessage for UniqueKeyInvalidatedMessage {
    fn should_send(&self, context: ContextId) -> bool {
        self.context_id == context
    }

    fn bus() -> &'static MessageBus<Self> {
        static BUS: OnceLock<MessageBus<UniqueKeyInvalidatedMessage>> = OnceLock::new();
        BUS.get_or_init(MessageBus::new)
    }
}
