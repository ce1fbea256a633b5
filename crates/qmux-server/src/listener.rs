use crate::endpoint::EndpointId;
use crate::session::Session;
use std::sync::Arc;

/// Handle returned by [`ListenerChain::push`]; identifies a listener for
/// removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Observer attached to a socket.
///
/// Events arrive at the most recently pushed listener first. Every handler
/// receives a [`Prev`] continuation; the default implementations forward
/// the event down the stack, so a listener overrides exactly the events it
/// cares about and may swallow an event by not calling `prev`.
pub trait SocketListener: Send {
    fn on_error(&self, code: i64, prev: Prev<'_>) {
        prev.on_error(code);
    }

    fn on_session_ready(&self, session: &Arc<dyn Session>, prev: Prev<'_>) {
        prev.on_session_ready(session);
    }

    fn on_server_busy(&self, busy: bool, prev: Prev<'_>) {
        prev.on_server_busy(busy);
    }

    fn on_endpoint_done(&self, endpoint: EndpointId, prev: Prev<'_>) {
        prev.on_endpoint_done(endpoint);
    }

    fn on_destroy(&self, prev: Prev<'_>) {
        prev.on_destroy();
    }
}

type Entry = (ListenerId, Box<dyn SocketListener>);

/// Continuation pointing at the rest of the stack below the current
/// listener. Calling an event on it delivers to the next listener down;
/// at the bottom of the stack the event stops.
pub struct Prev<'a> {
    rest: &'a [Entry],
}

impl Prev<'_> {
    fn split(&self) -> Option<(&dyn SocketListener, Prev<'_>)> {
        let ((_, top), rest) = self.rest.split_last()?;
        Some((top.as_ref(), Prev { rest }))
    }

    pub fn on_error(&self, code: i64) {
        if let Some((top, prev)) = self.split() {
            top.on_error(code, prev);
        }
    }

    pub fn on_session_ready(&self, session: &Arc<dyn Session>) {
        if let Some((top, prev)) = self.split() {
            top.on_session_ready(session, prev);
        }
    }

    pub fn on_server_busy(&self, busy: bool) {
        if let Some((top, prev)) = self.split() {
            top.on_server_busy(busy, prev);
        }
    }

    pub fn on_endpoint_done(&self, endpoint: EndpointId) {
        if let Some((top, prev)) = self.split() {
            top.on_endpoint_done(endpoint, prev);
        }
    }

    pub fn on_destroy(&self) {
        if let Some((top, prev)) = self.split() {
            top.on_destroy(prev);
        }
    }
}

/// Socket-owned stack of listeners. Ownership points one way (socket to
/// listeners), so no back-references to the socket exist and the chain can
/// be torn down by dropping it.
#[derive(Default)]
pub(crate) struct ListenerChain {
    stack: Vec<Entry>,
    next_id: u64,
}

impl ListenerChain {
    /// Push a listener on top of the stack; it sees events first.
    pub(crate) fn push(&mut self, listener: Box<dyn SocketListener>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.stack.push((id, listener));
        id
    }

    /// Unlink a listener from anywhere in the stack.
    ///
    /// Removing a listener that is not present is a programming error and
    /// aborts: silently ignoring it would leave the caller convinced an
    /// observer was detached that is still receiving events.
    pub(crate) fn remove(&mut self, id: ListenerId) -> Box<dyn SocketListener> {
        let index = self
            .stack
            .iter()
            .position(|(entry_id, _)| *entry_id == id)
            .unwrap_or_else(|| panic!("listener {id:?} is not attached to this socket"));
        self.stack.remove(index).1
    }

    pub(crate) fn clear(&mut self) {
        self.stack.clear();
    }

    fn top(&self) -> Prev<'_> {
        Prev { rest: &self.stack }
    }

    pub(crate) fn emit_error(&self, code: i64) {
        self.top().on_error(code);
    }

    pub(crate) fn emit_session_ready(&self, session: &Arc<dyn Session>) {
        self.top().on_session_ready(session);
    }

    pub(crate) fn emit_server_busy(&self, busy: bool) {
        self.top().on_server_busy(busy);
    }

    pub(crate) fn emit_endpoint_done(&self, endpoint: EndpointId) {
        self.top().on_endpoint_done(endpoint);
    }

    pub(crate) fn emit_destroy(&self) {
        self.top().on_destroy();
    }
}
