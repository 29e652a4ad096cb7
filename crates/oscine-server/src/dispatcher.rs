//! Address-pattern dispatcher
//!
//! Maps OSC address patterns to handlers. Every registration whose pattern
//! matches a message's address is invoked, in registration order, with
//! `(address, fixed, args)`. Messages that match nothing go to the default
//! handler if one is set and are otherwise dropped.
//!
//! Handlers are either synchronous ([`Handler`]) or return a future
//! ([`AsyncHandler`]). [`Dispatcher::route_async`] awaits async handlers so
//! a cooperative loop can run other packets meanwhile; the synchronous entry
//! points drive them to completion on the calling thread.
//!
//! Registrations live in a generation-tagged arena: a [`Handle`] names one
//! slot and the generation it was issued under, so removing a registration
//! is O(1) and a stale handle can never remove a later occupant of the slot.

use futures::future::BoxFuture;
use futures::FutureExt;
use oscine_core::{Atom, Message, Packet, Pattern};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::DispatchError;

/// A message handler
///
/// Receives the concrete address, the fixed values given at registration,
/// and the decoded message arguments. A returned message is sent back to
/// the sender by the server.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, address: &str, fixed: &[Atom], args: &[Atom]) -> anyhow::Result<Option<Message>>;

    /// Entry point used by the dispatcher; `peer` is the sender when known.
    /// Override it to see who sent the message.
    fn handle_from(
        &self,
        peer: Option<SocketAddr>,
        address: &str,
        fixed: &[Atom],
        args: &[Atom],
    ) -> anyhow::Result<Option<Message>> {
        let _ = peer;
        self.handle(address, fixed, args)
    }
}

impl<F> Handler for F
where
    F: Fn(&str, &[Atom], &[Atom]) -> anyhow::Result<Option<Message>> + Send + Sync + 'static,
{
    fn handle(&self, address: &str, fixed: &[Atom], args: &[Atom]) -> anyhow::Result<Option<Message>> {
        self(address, fixed, args)
    }
}

/// Closure handler that also takes the sender's address
pub struct WithPeer<F>(pub F);

impl<F> Handler for WithPeer<F>
where
    F: Fn(Option<SocketAddr>, &str, &[Atom], &[Atom]) -> anyhow::Result<Option<Message>>
        + Send
        + Sync
        + 'static,
{
    fn handle(&self, address: &str, fixed: &[Atom], args: &[Atom]) -> anyhow::Result<Option<Message>> {
        (self.0)(None, address, fixed, args)
    }

    fn handle_from(
        &self,
        peer: Option<SocketAddr>,
        address: &str,
        fixed: &[Atom],
        args: &[Atom],
    ) -> anyhow::Result<Option<Message>> {
        (self.0)(peer, address, fixed, args)
    }
}

/// What an [`AsyncHandler`] returns
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Option<Message>>>;

/// A handler that can wait without holding up its event loop
///
/// The returned future owns what it needs; copy arguments out before the
/// first `.await`. Closures `Fn(&str, &[Atom], &[Atom]) -> impl Future`
/// implement this and ignore the peer.
pub trait AsyncHandler: Send + Sync + 'static {
    fn call(
        &self,
        peer: Option<SocketAddr>,
        address: &str,
        fixed: &[Atom],
        args: &[Atom],
    ) -> HandlerFuture;
}

impl<F, Fut> AsyncHandler for F
where
    F: Fn(&str, &[Atom], &[Atom]) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<Message>>> + Send + 'static,
{
    fn call(
        &self,
        _peer: Option<SocketAddr>,
        address: &str,
        fixed: &[Atom],
        args: &[Atom],
    ) -> HandlerFuture {
        Box::pin(self(address, fixed, args))
    }
}

#[derive(Clone)]
enum Callback {
    Sync(Arc<dyn Handler>),
    Async(Arc<dyn AsyncHandler>),
}

/// Opaque reference to one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Clone)]
struct Registration {
    pattern: Pattern,
    callback: Callback,
    fixed: Arc<[Atom]>,
    seq: u64,
}

#[derive(Clone, Default)]
struct Slot {
    generation: u32,
    entry: Option<Registration>,
}

#[derive(Clone, Default)]
struct Table {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    next_seq: u64,
    default: Option<Callback>,
}

impl Table {
    fn insert(&mut self, registration: Registration) -> Handle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(registration);
            return Handle {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            entry: Some(registration),
        });
        Handle {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    fn remove(&mut self, index: u32) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            if slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index);
                self.live -= 1;
            }
        }
    }
}

/// A handler invocation resolved under the read lock
struct Invocation {
    callback: Callback,
    fixed: Arc<[Atom]>,
}

/// Everything that happened while routing one message
#[derive(Debug, Default)]
pub struct Routed {
    /// Reply messages returned by handlers, in invocation order
    pub replies: Vec<Message>,
    /// Handler failures, in invocation order
    pub errors: Vec<DispatchError>,
    /// Number of registrations invoked
    pub matched: usize,
    /// True when the default handler ran
    pub defaulted: bool,
}

/// Routes messages to registered handlers
#[derive(Default)]
pub struct Dispatcher {
    table: RwLock<Table>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure under `pattern`
    pub fn map<F>(&self, pattern: &str, handler: F, fixed: Vec<Atom>) -> Result<Handle, DispatchError>
    where
        F: Fn(&str, &[Atom], &[Atom]) -> anyhow::Result<Option<Message>> + Send + Sync + 'static,
    {
        self.map_shared(pattern, Arc::new(handler), fixed)
    }

    /// Register any [`Handler`] implementation under `pattern`
    pub fn map_handler<H: Handler>(&self, pattern: &str, handler: H, fixed: Vec<Atom>) -> Result<Handle, DispatchError> {
        self.map_shared(pattern, Arc::new(handler), fixed)
    }

    /// Register a closure that is also given the sender's address
    pub fn map_with_peer<F>(&self, pattern: &str, handler: F, fixed: Vec<Atom>) -> Result<Handle, DispatchError>
    where
        F: Fn(Option<SocketAddr>, &str, &[Atom], &[Atom]) -> anyhow::Result<Option<Message>>
            + Send
            + Sync
            + 'static,
    {
        self.map_shared(pattern, Arc::new(WithPeer(handler)), fixed)
    }

    /// Register a shared handler; the same `Arc` may be mapped many times
    pub fn map_shared(
        &self,
        pattern: &str,
        handler: Arc<dyn Handler>,
        fixed: Vec<Atom>,
    ) -> Result<Handle, DispatchError> {
        self.register(pattern, Callback::Sync(handler), fixed)
    }

    /// Register a handler returning a future
    pub fn map_async<H: AsyncHandler>(&self, pattern: &str, handler: H, fixed: Vec<Atom>) -> Result<Handle, DispatchError> {
        self.register(pattern, Callback::Async(Arc::new(handler)), fixed)
    }

    fn register(&self, pattern: &str, callback: Callback, fixed: Vec<Atom>) -> Result<Handle, DispatchError> {
        let pattern = Pattern::compile(pattern)?;
        let mut table = self.table.write();
        let seq = table.next_seq;
        table.next_seq += 1;
        debug!("Mapping handler #{} to {}", seq, pattern);
        Ok(table.insert(Registration {
            pattern,
            callback,
            fixed: fixed.into(),
            seq,
        }))
    }

    /// Remove exactly the registration named by `handle`
    pub fn unmap(&self, pattern: &str, handle: Handle) -> Result<(), DispatchError> {
        let mut table = self.table.write();
        let found = table
            .slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
            .is_some_and(|entry| entry.pattern.as_str() == pattern);
        if !found {
            return Err(DispatchError::NotFound {
                pattern: pattern.to_string(),
            });
        }
        table.remove(handle.index);
        debug!("Unmapped {} from {}", handle, pattern);
        Ok(())
    }

    /// Remove the earliest registration of `handler` with these fixed values
    pub fn unmap_handler(
        &self,
        pattern: &str,
        handler: &Arc<dyn Handler>,
        fixed: &[Atom],
    ) -> Result<(), DispatchError> {
        let mut table = self.table.write();
        let target = table
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.entry.as_ref().map(|e| (i, e)))
            .filter(|(_, e)| {
                e.pattern.as_str() == pattern && same_handler(&e.callback, handler) && &*e.fixed == fixed
            })
            .min_by_key(|(_, e)| e.seq)
            .map(|(i, _)| i as u32);

        match target {
            Some(index) => {
                table.remove(index);
                Ok(())
            }
            None => Err(DispatchError::NotFound {
                pattern: pattern.to_string(),
            }),
        }
    }

    pub fn set_default_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &[Atom], &[Atom]) -> anyhow::Result<Option<Message>> + Send + Sync + 'static,
    {
        self.set_default_shared(Arc::new(handler));
    }

    pub fn set_default_with_peer<F>(&self, handler: F)
    where
        F: Fn(Option<SocketAddr>, &str, &[Atom], &[Atom]) -> anyhow::Result<Option<Message>>
            + Send
            + Sync
            + 'static,
    {
        self.set_default_shared(Arc::new(WithPeer(handler)));
    }

    pub fn set_default_shared(&self, handler: Arc<dyn Handler>) {
        self.table.write().default = Some(Callback::Sync(handler));
    }

    pub fn set_default_async<H: AsyncHandler>(&self, handler: H) {
        self.table.write().default = Some(Callback::Async(Arc::new(handler)));
    }

    pub fn clear_default_handler(&self) {
        self.table.write().default = None;
    }

    pub fn has_default_handler(&self) -> bool {
        self.table.read().default.is_some()
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.table.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Independent copy of the current registration table
    pub fn snapshot(&self) -> Dispatcher {
        Dispatcher {
            table: RwLock::new(self.table.read().clone()),
        }
    }

    /// Dispatch every message in `packet`, depth-first in element order.
    ///
    /// Bundle timestamps are not waited on here. All handlers run even when
    /// some fail; the first failure is returned after the rest complete.
    pub fn dispatch(&self, packet: &Packet) -> Result<Vec<Message>, DispatchError> {
        self.dispatch_from(packet, None)
    }

    /// [`Dispatcher::dispatch`] on behalf of the sender at `peer`
    pub fn dispatch_from(&self, packet: &Packet, peer: Option<SocketAddr>) -> Result<Vec<Message>, DispatchError> {
        let mut replies = Vec::new();
        let mut first_error = None;
        for message in packet.messages() {
            let routed = self.route_from(message, peer);
            replies.extend(routed.replies);
            if first_error.is_none() {
                first_error = routed.errors.into_iter().next();
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(replies),
        }
    }

    /// Dispatch a single message
    pub fn dispatch_message(&self, message: &Message) -> Result<Vec<Message>, DispatchError> {
        let routed = self.route(message);
        match routed.errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(routed.replies),
        }
    }

    /// Route one message and report every outcome
    pub fn route(&self, message: &Message) -> Routed {
        self.route_from(message, None)
    }

    /// Route one message from `peer`. Async handlers are driven to
    /// completion on the calling thread.
    pub fn route_from(&self, message: &Message, peer: Option<SocketAddr>) -> Routed {
        let address = message.address();
        let mut routed = Routed::default();
        for inv in self.plan(address, &mut routed) {
            let outcome = match &inv.callback {
                Callback::Sync(handler) => call_sync(&**handler, peer, address, &inv.fixed, message.args()),
                Callback::Async(handler) => futures::executor::block_on(call_async(
                    &**handler,
                    peer,
                    address,
                    &inv.fixed,
                    message.args(),
                )),
            };
            record(outcome, address, &mut routed);
        }
        routed
    }

    /// Route one message from `peer`, awaiting async handlers
    pub async fn route_async(&self, message: &Message, peer: Option<SocketAddr>) -> Routed {
        let address = message.address();
        let mut routed = Routed::default();
        for inv in self.plan(address, &mut routed) {
            let outcome = match &inv.callback {
                Callback::Sync(handler) => call_sync(&**handler, peer, address, &inv.fixed, message.args()),
                Callback::Async(handler) => {
                    call_async(&**handler, peer, address, &inv.fixed, message.args()).await
                }
            };
            record(outcome, address, &mut routed);
        }
        routed
    }

    /// Invocations for `address`, falling back to the default handler
    fn plan(&self, address: &str, routed: &mut Routed) -> Vec<Invocation> {
        let (invocations, default) = self.resolve(address);
        if !invocations.is_empty() {
            routed.matched = invocations.len();
            return invocations;
        }
        match default {
            Some(callback) => {
                trace!("No match for {}, using default handler", address);
                routed.defaulted = true;
                vec![Invocation {
                    callback,
                    fixed: Arc::from(Vec::<Atom>::new()),
                }]
            }
            None => {
                trace!("No handler for {}", address);
                Vec::new()
            }
        }
    }

    /// Clone out matching registrations so handlers run without the lock held
    fn resolve(&self, address: &str) -> (Vec<Invocation>, Option<Callback>) {
        let table = self.table.read();
        let mut matches: Vec<&Registration> = table
            .slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|entry| entry.pattern.matches(address))
            .collect();
        matches.sort_by_key(|entry| entry.seq);

        let invocations = matches
            .into_iter()
            .map(|entry| Invocation {
                callback: entry.callback.clone(),
                fixed: entry.fixed.clone(),
            })
            .collect();
        (invocations, table.default.clone())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.read();
        let patterns: Vec<&str> = table
            .slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .map(|entry| entry.pattern.as_str())
            .collect();
        f.debug_struct("Dispatcher")
            .field("patterns", &patterns)
            .field("default", &table.default.is_some())
            .finish()
    }
}

type Outcome = Result<anyhow::Result<Option<Message>>, Box<dyn Any + Send>>;

fn call_sync(handler: &dyn Handler, peer: Option<SocketAddr>, address: &str, fixed: &[Atom], args: &[Atom]) -> Outcome {
    catch_unwind(AssertUnwindSafe(|| handler.handle_from(peer, address, fixed, args)))
}

async fn call_async(
    handler: &dyn AsyncHandler,
    peer: Option<SocketAddr>,
    address: &str,
    fixed: &[Atom],
    args: &[Atom],
) -> Outcome {
    match catch_unwind(AssertUnwindSafe(|| handler.call(peer, address, fixed, args))) {
        Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
        Err(payload) => Err(payload),
    }
}

fn record(outcome: Outcome, address: &str, routed: &mut Routed) {
    match outcome {
        Ok(Ok(Some(reply))) => routed.replies.push(reply),
        Ok(Ok(None)) => {}
        Ok(Err(source)) => routed.errors.push(DispatchError::Handler {
            address: address.to_string(),
            source,
        }),
        Err(payload) => routed.errors.push(DispatchError::Handler {
            address: address.to_string(),
            source: anyhow::anyhow!("handler panicked: {}", panic_message(&*payload)),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Compare handler identity by data pointer, ignoring vtables
fn same_handler(a: &Callback, b: &Arc<dyn Handler>) -> bool {
    match a {
        Callback::Sync(a) => std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ()),
        Callback::Async(_) => false,
    }
}
