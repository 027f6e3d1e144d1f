//! Multi-connection event loop: owns connections, scheduler, and the
//! priority-ordered handler table, and drives everything from one
//! `tokio::select!`-based `process_once` tick.
//!
//! Per §9's ownership redesign, the reactor owns every connection by value,
//! indexed by a stable handle; connections never hold a back-pointer to it.
//! Handlers that need to act on a connection look it up through the
//! reactor by handle instead.

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::time::Duration;

use futures_util::future::select_all;

use crate::connection::{ConnectParams, ServerConnection};
use crate::dcc::{DccConnection, DccMode, PendingPassive};
use crate::error::CoreError;
use crate::message::Event;
use crate::scheduler::Scheduler;
use crate::socket::SocketFactory;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Continue,
    NoMore,
}

/// A synchronous event handler. Returns whether dispatch should continue to
/// lower-priority handlers, plus any raw commands to send back on the
/// connection the event arrived on (e.g. a CTCP reply).
pub type HandlerFn = Box<dyn FnMut(&Event) -> (HandlerResult, Vec<String>) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct HandlerEntry {
    id: HandlerId,
    priority: i32,
    func: HandlerFn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DccHandle(usize);

enum DccSlot {
    Pending(PendingPassive),
    Live(DccConnection),
}

enum EventSource {
    Server(usize),
    Dcc(usize),
}

const ALL_EVENTS: &str = "all_events";

/// Owns every connection, the handler table, and the scheduler.
pub struct Reactor {
    connections: Vec<Option<ServerConnection>>,
    dcc: Vec<Option<DccSlot>>,
    handlers: HashMap<String, Vec<HandlerEntry>>,
    scheduler: Scheduler,
    socket_factory: SocketFactory,
    next_handler_id: u64,
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new(SocketFactory::new())
    }
}

impl Reactor {
    pub fn new(socket_factory: SocketFactory) -> Self {
        let mut reactor = Self {
            connections: Vec::new(),
            dcc: Vec::new(),
            handlers: HashMap::new(),
            scheduler: Scheduler::new(),
            socket_factory,
            next_handler_id: 0,
        };
        reactor.add_global_handler(
            "ping",
            -42,
            Box::new(|event: &Event| {
                let token = event
                    .target
                    .clone()
                    .or_else(|| event.arguments.first().cloned())
                    .unwrap_or_default();
                (HandlerResult::Continue, vec![format!("PONG {token}")])
            }),
        );
        reactor
    }

    pub fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    // ---- connection lifecycle ----

    /// Register a new, disconnected server connection and return a stable handle.
    pub fn server(&mut self) -> ConnectionHandle {
        self.connections.push(Some(ServerConnection::new()));
        ConnectionHandle(self.connections.len() - 1)
    }

    pub fn connection(&self, handle: ConnectionHandle) -> Option<&ServerConnection> {
        self.connections.get(handle.0).and_then(|c| c.as_ref())
    }

    pub fn connection_mut(&mut self, handle: ConnectionHandle) -> Option<&mut ServerConnection> {
        self.connections.get_mut(handle.0).and_then(|c| c.as_mut())
    }

    pub async fn connect(
        &mut self,
        handle: ConnectionHandle,
        params: ConnectParams,
    ) -> Result<(), CoreError> {
        let conn = self
            .connections
            .get_mut(handle.0)
            .and_then(|c| c.as_mut())
            .ok_or(CoreError::NotConnected)?;
        conn.connect(&self.socket_factory, params).await
    }

    /// Remove a connection entirely, freeing its socket and slot.
    pub fn close(&mut self, handle: ConnectionHandle) {
        if let Some(slot) = self.connections.get_mut(handle.0) {
            *slot = None;
        }
    }

    // ---- DCC lifecycle ----

    pub async fn dcc_connect_active(
        &mut self,
        addr: SocketAddr,
        mode: DccMode,
    ) -> Result<DccHandle, CoreError> {
        let conn = DccConnection::connect_active(addr, mode).await?;
        let event = conn.connect_event();
        self.dcc.push(Some(DccSlot::Live(conn)));
        let handle = DccHandle(self.dcc.len() - 1);
        self.dispatch_dcc(handle, &event).await;
        Ok(handle)
    }

    /// Bind an ephemeral port and register a pending passive slot; returns
    /// the handle and bound address so the caller can advertise it over CTCP.
    pub async fn dcc_listen(
        &mut self,
        bind_ip: IpAddr,
        mode: DccMode,
    ) -> Result<(DccHandle, SocketAddr), CoreError> {
        let pending = DccConnection::listen_passive(bind_ip, mode).await?;
        let addr = pending
            .local_addr()
            .map_err(|e| CoreError::DccConnectFailed(e.to_string()))?;
        self.dcc.push(Some(DccSlot::Pending(pending)));
        Ok((DccHandle(self.dcc.len() - 1), addr))
    }

    /// Block until a pending passive slot's peer connects.
    pub async fn dcc_accept(&mut self, handle: DccHandle) -> Result<(), CoreError> {
        let slot = self
            .dcc
            .get_mut(handle.0)
            .and_then(Option::take)
            .ok_or(CoreError::NotConnected)?;
        let DccSlot::Pending(pending) = slot else {
            // already live; put it back untouched
            self.dcc[handle.0] = Some(slot);
            return Ok(());
        };
        let live = pending.accept().await?;
        let event = live.connect_event();
        self.dcc[handle.0] = Some(DccSlot::Live(live));
        self.dispatch_dcc(handle, &event).await;
        Ok(())
    }

    pub fn dcc_connection(&self, handle: DccHandle) -> Option<&DccConnection> {
        match self.dcc.get(handle.0)?.as_ref()? {
            DccSlot::Live(c) => Some(c),
            DccSlot::Pending(_) => None,
        }
    }

    pub fn dcc_connection_mut(&mut self, handle: DccHandle) -> Option<&mut DccConnection> {
        match self.dcc.get_mut(handle.0)?.as_mut()? {
            DccSlot::Live(c) => Some(c),
            DccSlot::Pending(_) => None,
        }
    }

    pub fn close_dcc(&mut self, handle: DccHandle) {
        if let Some(slot) = self.dcc.get_mut(handle.0) {
            *slot = None;
        }
    }

    // ---- handler table ----

    /// Insert maintaining ascending-priority order (stable on ties).
    pub fn add_global_handler(
        &mut self,
        event: &str,
        priority: i32,
        func: HandlerFn,
    ) -> HandlerId {
        let id = HandlerId(self.next_handler_id);
        self.next_handler_id += 1;
        let entry = HandlerEntry { id, priority, func };
        let list = self.handlers.entry(event.to_string()).or_default();
        let pos = list.iter().position(|e| e.priority > priority).unwrap_or(list.len());
        list.insert(pos, entry);
        id
    }

    pub fn remove_global_handler(&mut self, event: &str, id: HandlerId) -> bool {
        if let Some(list) = self.handlers.get_mut(event) {
            if let Some(pos) = list.iter().position(|e| e.id == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Dispatch to `all_events` handlers and `event.kind` handlers, sorted
    /// ascending by priority, halting early on `HandlerResult::NoMore`.
    /// Commands any handler returns are sent back on the originating
    /// connection after every handler has run.
    async fn dispatch_server(&mut self, handle: ConnectionHandle, event: &Event) {
        let to_send = self.run_handlers(event);
        if let Some(conn) = self.connections.get_mut(handle.0).and_then(|c| c.as_mut()) {
            for cmd in to_send {
                if let Err(e) = conn.send_raw(&cmd).await {
                    tracing::warn!("dropping handler-produced command: {e}");
                }
            }
        }
    }

    async fn dispatch_dcc(&mut self, handle: DccHandle, event: &Event) {
        let to_send = self.run_handlers(event);
        if let Some(DccSlot::Live(conn)) = self.dcc.get_mut(handle.0).and_then(|c| c.as_mut()) {
            for cmd in to_send {
                if let Err(e) = conn.privmsg(&cmd).await {
                    tracing::warn!("dropping handler-produced DCC message: {e}");
                }
            }
        }
    }

    pub(crate) fn run_handlers(&mut self, event: &Event) -> Vec<String> {
        let all = self.handlers.remove(ALL_EVENTS).unwrap_or_default();
        let specific = self.handlers.remove(&event.kind).unwrap_or_default();
        let mut merged: Vec<(bool, HandlerEntry)> = all
            .into_iter()
            .map(|e| (true, e))
            .chain(specific.into_iter().map(|e| (false, e)))
            .collect();
        merged.sort_by(|a, b| a.1.priority.cmp(&b.1.priority).then(a.1.id.0.cmp(&b.1.id.0)));

        let mut to_send = Vec::new();
        let mut stop = false;
        for (_, entry) in merged.iter_mut() {
            if stop {
                continue;
            }
            let (result, cmds) = (entry.func)(event);
            to_send.extend(cmds);
            if result == HandlerResult::NoMore {
                stop = true;
            }
        }

        for (is_all, entry) in merged {
            let key = if is_all { ALL_EVENTS.to_string() } else { event.kind.clone() };
            self.handlers.entry(key).or_default().push(entry);
        }
        for list in self.handlers.values_mut() {
            list.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.0.cmp(&b.id.0)));
        }
        to_send
    }

    // ---- event loop ----

    /// Wait up to `timeout` for a readable connection or the earliest
    /// scheduler due time, then read and dispatch, then run due scheduler
    /// entries. If no sockets are registered, just sleeps `timeout`.
    pub async fn process_once(&mut self, timeout: Duration) -> Result<(), CoreError> {
        let sleep_dur = match self.scheduler.next_due() {
            Some(due) => {
                let remaining = due.saturating_duration_since(tokio::time::Instant::now());
                remaining.min(timeout)
            }
            None => timeout,
        };

        let live_count = self.connections.iter().filter(|c| c.is_some()).count()
            + self
                .dcc
                .iter()
                .filter(|c| matches!(c, Some(DccSlot::Live(_))))
                .count();

        if live_count == 0 {
            tokio::time::sleep(sleep_dur).await;
            self.scheduler.run_pending();
            return Ok(());
        }

        type ReadFuture<'a> =
            Pin<Box<dyn Future<Output = (EventSource, Result<Vec<Event>, CoreError>)> + Send + 'a>>;
        let mut futs: Vec<ReadFuture<'_>> = Vec::new();

        for (i, slot) in self.connections.iter_mut().enumerate() {
            if let Some(conn) = slot.as_mut() {
                futs.push(Box::pin(async move { (EventSource::Server(i), conn.receive().await) }));
            }
        }
        for (i, slot) in self.dcc.iter_mut().enumerate() {
            if let Some(DccSlot::Live(conn)) = slot.as_mut() {
                futs.push(Box::pin(async move { (EventSource::Dcc(i), conn.receive().await) }));
            }
        }

        let outcome = tokio::select! {
            _ = tokio::time::sleep(sleep_dur) => None,
            ready = select_all(futs) => {
                let ((source, events), _idx, remaining) = ready;
                drop(remaining);
                Some((source, events))
            }
        };

        if let Some((source, events)) = outcome {
            match events {
                Ok(evs) => {
                    for ev in evs {
                        match source {
                            EventSource::Server(i) => self.dispatch_server(ConnectionHandle(i), &ev).await,
                            EventSource::Dcc(i) => self.dispatch_dcc(DccHandle(i), &ev).await,
                        }
                    }
                }
                Err(e) => tracing::warn!("connection read error: {e}"),
            }
        }

        self.scheduler.run_pending();
        Ok(())
    }

    pub async fn process_forever(&mut self, timeout: Duration) -> Result<(), CoreError> {
        loop {
            self.process_once(timeout).await?;
        }
    }

    /// Gracefully quit every live server connection.
    pub async fn disconnect_all(&mut self, message: Option<&str>) {
        for slot in self.connections.iter_mut() {
            if let Some(conn) = slot.as_mut() {
                let _ = conn.quit(message).await;
                conn.close();
            }
        }
    }
}
