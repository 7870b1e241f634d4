//! Document-level listener registry.
//!
//! The recognizer never installs closures on the host; it registers
//! listener descriptors here and the host routes every raw event through
//! [`Document::route`] before handing it to anyone else. That keeps the
//! registrations countable, so a leaked listener is observable.

use log::debug;
use thiserror::Error;

use crate::input::{EventKind, InputEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Capture,
    Bubble,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerAction {
    /// stopPropagation + preventDefault
    Block,
    /// report the firing back to whoever registered it
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listener {
    pub kind: EventKind,
    pub phase: Phase,
    pub action: ListenerAction,
    pub once: bool,
}

impl Listener {
    pub fn blocker(kind: EventKind) -> Self {
        Self {
            kind,
            phase: Phase::Capture,
            action: ListenerAction::Block,
            once: false,
        }
    }

    pub fn one_shot(kind: EventKind) -> Self {
        Self {
            kind,
            phase: Phase::Capture,
            action: ListenerAction::Notify,
            once: true,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Routed {
    /// a blocker swallowed the event
    pub blocked: bool,
    /// notify listeners that fired, in registration order
    pub fired: Vec<ListenerId>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no target accepts {0} events")]
    NoTarget(&'static str),
    #[error("dispatch rejected: {0}")]
    Rejected(String),
}

pub trait Document {
    fn add_listener(&mut self, listener: Listener) -> ListenerId;
    /// Returns false if `id` was not registered.
    fn remove_listener(&mut self, id: ListenerId) -> bool;
    fn listener_count(&self) -> usize;
    /// Run a raw (host-originated) event through the registered listeners.
    fn route(&mut self, ev: &InputEvent) -> Routed;
    /// Deliver an engine-synthesized event to the other subsystems.
    fn dispatch_synthetic(&mut self, ev: InputEvent) -> Result<(), DispatchError>;
}

/// In-process document: a listener table plus an outbox of synthetic
/// events that the host forwards to the drag subsystem.
#[derive(Debug, Default)]
pub struct EventBus {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
    outbox: Vec<InputEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain_synthetic(&mut self) -> Vec<InputEvent> {
        std::mem::take(&mut self.outbox)
    }
}

impl Document for EventBus {
    fn add_listener(&mut self, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.push((id, listener));
        id
    }

    fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(i, _)| *i != id);
        self.listeners.len() != before
    }

    fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn route(&mut self, ev: &InputEvent) -> Routed {
        let mut routed = Routed::default();
        let mut spent = vec![];
        // capture listeners run before bubble listeners
        for phase in [Phase::Capture, Phase::Bubble] {
            for (id, l) in &self.listeners {
                if l.phase != phase || l.kind != ev.kind {
                    continue;
                }
                match l.action {
                    ListenerAction::Block => routed.blocked = true,
                    ListenerAction::Notify if ev.trusted => routed.fired.push(*id),
                    ListenerAction::Notify => continue,
                }
                if l.once {
                    spent.push(*id);
                }
            }
            if routed.blocked {
                break;
            }
        }
        self.listeners.retain(|(id, _)| !spent.contains(id));
        routed
    }

    fn dispatch_synthetic(&mut self, ev: InputEvent) -> Result<(), DispatchError> {
        debug!("synthetic {} for pointer {}", ev.kind.as_str(), ev.pointer_id);
        self.outbox.push(ev);
        Ok(())
    }
}
