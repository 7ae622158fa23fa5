use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::commands::{CommandQueue, RemoteCommand, DEFAULT_BATCH_WINDOW};
use crate::error::EngineError;
use crate::transport::{RequestId, Transport, TransportEvent};
use crate::types::{Delta, SessionSnapshot, StateUpdate};

/// Exponential backoff for unexpected transport loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_delay: Duration::from_millis(500), max_delay: Duration::from_secs(30), max_attempts: None }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt: base, doubling, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << shift;
        self.base_delay.checked_mul(factor).unwrap_or(self.max_delay).min(self.max_delay)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|m| attempt > m)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub batch_window: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self { Self { batch_window: DEFAULT_BATCH_WINDOW, reconnect: ReconnectPolicy::default() } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting { attempt: u32, next_at: Instant },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub session_token: Option<String>,
}

#[derive(Debug)]
pub enum EngineEvent {
    /// The mirrored snapshot changed.
    StateChanged,
    Connected(ConnectionInfo),
    Reconnecting { attempt: u32, delay: Duration },
    Disconnected,
    Error(EngineError),
    CommandResult { id: RequestId, result: Result<String, EngineError> },
}

/// Mirror of the remote session plus the ordered outgoing command channel.
/// The engine is the only writer of the snapshot.
pub struct Engine {
    transport: Box<dyn Transport>,
    snapshot: Option<SessionSnapshot>,
    last_seq: Option<u64>,
    queue: CommandQueue,
    policy: ReconnectPolicy,
    state: ConnectionState,
    explicit_disconnect: bool,
    held: bool,
    held_updates: VecDeque<StateUpdate>,
    next_request: RequestId,
    in_flight: HashSet<RequestId>,
    connection: Option<ConnectionInfo>,
}

impl Engine {
    pub fn new(transport: Box<dyn Transport>, config: EngineConfig) -> Self {
        Self {
            transport,
            snapshot: None,
            last_seq: None,
            queue: CommandQueue::new(config.batch_window),
            policy: config.reconnect,
            state: ConnectionState::Disconnected,
            explicit_disconnect: false,
            held: false,
            held_updates: VecDeque::new(),
            next_request: 1,
            in_flight: HashSet::new(),
            connection: None,
        }
    }

    pub fn snapshot(&self) -> Option<&SessionSnapshot> { self.snapshot.as_ref() }

    pub fn connection_state(&self) -> ConnectionState { self.state }

    pub fn connection_info(&self) -> Option<&ConnectionInfo> { self.connection.as_ref() }

    pub fn last_seq(&self) -> Option<u64> { self.last_seq }

    /// Open the transport. On failure the error is returned and a reconnect
    /// is scheduled.
    pub fn connect(&mut self, now: Instant) -> Result<(), EngineError> {
        self.explicit_disconnect = false;
        match self.transport.connect() {
            Ok(()) => {
                info!("connected");
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.schedule_reconnect(1, now);
                Err(e.into())
            }
        }
    }

    /// User-initiated disconnect: pending batches are flushed first and no
    /// reconnect follows.
    pub fn disconnect(&mut self) -> Vec<EngineEvent> {
        self.flush();
        self.explicit_disconnect = true;
        self.transport.disconnect();
        self.state = ConnectionState::Disconnected;
        info!("disconnected by user");
        let mut events = self.fail_in_flight();
        events.push(EngineEvent::Disconnected);
        events
    }

    /// Apply one authoritative update and return the resulting snapshot.
    pub fn apply_update(&mut self, update: StateUpdate) -> Result<&SessionSnapshot, EngineError> {
        match update {
            StateUpdate::Full { state } => {
                debug!(panes = state.panes.len(), windows = state.windows.len(), "full snapshot");
                self.last_seq = None;
                Ok(&*self.snapshot.insert(state))
            }
            StateUpdate::Delta { delta } => {
                let Some(snap) = self.snapshot.as_mut() else {
                    warn!(seq = delta.seq, "delta before full snapshot dropped");
                    return Err(EngineError::StaleDelta { seq: delta.seq });
                };
                match self.last_seq {
                    Some(last) if delta.seq <= last => {
                        debug!(seq = delta.seq, last, "duplicate delta dropped");
                        return Ok(&*snap);
                    }
                    Some(last) if delta.seq > last.saturating_add(1) => {
                        warn!(seq = delta.seq, last, "delta sequence gap");
                    }
                    _ => {}
                }
                self.last_seq = Some(delta.seq);
                merge_delta(snap, &delta);
                Ok(&*snap)
            }
        }
    }

    /// Hold incoming updates while a gesture is in progress. Releasing applies
    /// everything that queued up, in arrival order.
    pub fn set_updates_held(&mut self, held: bool) -> Vec<EngineEvent> {
        self.held = held;
        let mut events = Vec::new();
        if held { return events; }
        while let Some(update) = self.held_updates.pop_front() {
            self.apply_and_report(update, &mut events);
        }
        events
    }

    pub fn updates_held(&self) -> bool { self.held }

    pub fn held_update_count(&self) -> usize { self.held_updates.len() }

    /// Schedule a fire-and-forget command.
    pub fn enqueue(&mut self, cmd: RemoteCommand, now: Instant) {
        debug!(cmd = %cmd, "enqueue");
        let ready = self.queue.push(cmd, now);
        self.send_all(ready);
    }

    /// Send every pending batch now.
    pub fn flush(&mut self) {
        let ready = self.queue.flush();
        self.send_all(ready);
    }

    /// Send a command whose outcome is reported later as
    /// `EngineEvent::CommandResult`. Pending batches go out first.
    pub fn request(&mut self, cmd: RemoteCommand) -> Result<RequestId, EngineError> {
        self.flush();
        let id = self.next_request;
        self.next_request += 1;
        self.transport.request(id, &cmd.encode())?;
        self.in_flight.insert(id);
        Ok(id)
    }

    pub fn pending_requests(&self) -> usize { self.in_flight.len() }

    /// Earliest instant at which `pump` has timed work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let reconnect = match self.state {
            ConnectionState::Reconnecting { next_at, .. } => Some(next_at),
            _ => None,
        };
        match (self.queue.next_deadline(), reconnect) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Drain transport events, run due timers, and report what happened.
    pub fn pump(&mut self, now: Instant) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        for ev in self.transport.poll() {
            match ev {
                TransportEvent::Connected { connection_id, session_token } => {
                    info!(%connection_id, "handshake complete");
                    let info = ConnectionInfo { connection_id, session_token };
                    self.connection = Some(info.clone());
                    self.state = ConnectionState::Connected;
                    events.push(EngineEvent::Connected(info));
                }
                TransportEvent::Update(update) => {
                    if self.held {
                        self.held_updates.push_back(update);
                    } else {
                        self.apply_and_report(update, &mut events);
                    }
                }
                TransportEvent::Response { id, result } => {
                    if !self.in_flight.remove(&id) {
                        debug!(id, "response for unknown request");
                        continue;
                    }
                    events.push(EngineEvent::CommandResult { id, result: result.map_err(EngineError::CommandRejected) });
                }
                TransportEvent::Malformed(msg) => {
                    warn!(%msg, "malformed update dropped");
                    events.push(EngineEvent::Error(EngineError::Malformed(msg)));
                }
                TransportEvent::Error(msg) => {
                    warn!(%msg, "remote error");
                    events.push(EngineEvent::Error(EngineError::Malformed(msg)));
                }
                TransportEvent::Disconnected => {
                    events.extend(self.fail_in_flight());
                    if self.explicit_disconnect {
                        self.state = ConnectionState::Disconnected;
                        continue;
                    }
                    warn!("transport lost");
                    events.push(EngineEvent::Disconnected);
                    if let Some(ev) = self.schedule_reconnect(1, now) { events.push(ev); }
                }
            }
        }

        if let ConnectionState::Reconnecting { attempt, next_at } = self.state {
            if now >= next_at && !self.explicit_disconnect {
                match self.transport.connect() {
                    Ok(()) => {
                        info!(attempt, "reconnected");
                        self.state = ConnectionState::Connected;
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "reconnect failed");
                        events.push(EngineEvent::Error(e.into()));
                        if let Some(ev) = self.schedule_reconnect(attempt + 1, now) { events.push(ev); }
                    }
                }
            }
        }

        let due = self.queue.take_due(now);
        self.send_all(due);
        events
    }

    fn schedule_reconnect(&mut self, attempt: u32, now: Instant) -> Option<EngineEvent> {
        if self.explicit_disconnect { return None; }
        if self.policy.exhausted(attempt) {
            self.state = ConnectionState::Disconnected;
            let attempts = attempt - 1;
            warn!(attempts, "giving up on reconnect");
            return Some(EngineEvent::Error(EngineError::ReconnectExhausted { attempts }));
        }
        let delay = self.policy.delay_for(attempt);
        info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        self.state = ConnectionState::Reconnecting { attempt, next_at: now + delay };
        Some(EngineEvent::Reconnecting { attempt, delay })
    }

    fn fail_in_flight(&mut self) -> Vec<EngineEvent> {
        let mut ids: Vec<RequestId> = self.in_flight.drain().collect();
        ids.sort_unstable();
        ids.into_iter()
            .map(|id| EngineEvent::CommandResult { id, result: Err(EngineError::Transport(crate::error::TransportError::Closed)) })
            .collect()
    }

    fn apply_and_report(&mut self, update: StateUpdate, events: &mut Vec<EngineEvent>) {
        match self.apply_update(update) {
            Ok(_) => events.push(EngineEvent::StateChanged),
            Err(e) => events.push(EngineEvent::Error(e)),
        }
    }

    fn send_all(&mut self, cmds: Vec<RemoteCommand>) {
        for cmd in cmds {
            let line = cmd.encode();
            if let Err(e) = self.transport.send(&line) {
                // At-most-once: keystrokes are never replayed.
                warn!(error = %e, %line, "command dropped");
            }
        }
    }
}

/// Pure merge of a delta into a snapshot. Absent fields stay unchanged; a
/// `null` entity patch removes the entity; new entities replace in place or
/// append.
pub fn merge_delta(snap: &mut SessionSnapshot, delta: &Delta) {
    if let Some(v) = &delta.active_window_id { snap.active_window_id = Some(v.clone()); }
    if let Some(v) = &delta.active_pane_id { snap.active_pane_id = Some(v.clone()); }
    if let Some(v) = &delta.status_line { snap.status_line = v.clone(); }
    if let Some(v) = delta.total_width { snap.total_width = v; }
    if let Some(v) = delta.total_height { snap.total_height = v; }

    if let Some(patches) = &delta.panes {
        merge_entities(&mut snap.panes, patches, |p| &p.id, |d, p| d.apply_to(p));
    }
    if let Some(new) = &delta.new_panes {
        union_entities(&mut snap.panes, new, |p| &p.id);
    }
    if let Some(patches) = &delta.windows {
        merge_entities(&mut snap.windows, patches, |w| &w.id, |d, w| d.apply_to(w));
    }
    if let Some(new) = &delta.new_windows {
        union_entities(&mut snap.windows, new, |w| &w.id);
    }
}

fn merge_entities<T, P>(
    items: &mut Vec<T>,
    patches: &HashMap<String, Option<P>>,
    id: impl Fn(&T) -> &String,
    apply: impl Fn(&P, &mut T),
) {
    items.retain(|item| !matches!(patches.get(id(item)), Some(None)));
    for item in items.iter_mut() {
        if let Some(Some(patch)) = patches.get(id(item)) {
            apply(patch, item);
        }
    }
    for (key, patch) in patches {
        if patch.is_some() && !items.iter().any(|i| id(i) == key) {
            debug!(id = %key, "patch for unknown entity ignored");
        }
    }
}

fn union_entities<T: Clone>(items: &mut Vec<T>, new: &[T], id: impl Fn(&T) -> &String) {
    for n in new {
        match items.iter_mut().find(|i| id(i) == id(n)) {
            Some(existing) => *existing = n.clone(),
            None => items.push(n.clone()),
        }
    }
}
