//! Seams to the subsystems the recognizer shares raw input with: the
//! external drag library (read-only flag), the platform's pointer
//! capture, and the suppression window that keeps a long-press from
//! turning into a drag.

use std::{cell::Cell, rc::Rc};

use log::{debug, info};
use thiserror::Error;

use crate::document::{Document, Listener, ListenerId};
use crate::input::{DeviceClass, EventKind, GrabRequest, InputEvent, PointerId};

/// Read port onto the drag library's state. The recognizer never writes it.
pub trait DragSignal {
    fn in_progress(&self) -> bool;
    fn last_ended_ms(&self) -> Option<u64>;
}

/// Drag state owned by whoever hosts the drag library.
#[derive(Debug, Clone, Default)]
pub struct SharedDrag {
    active: Rc<Cell<bool>>,
    ended_ms: Rc<Cell<Option<u64>>>,
}

impl SharedDrag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, active: bool, at_ms: u64) {
        if self.active.replace(active) && !active {
            self.ended_ms.set(Some(at_ms));
        }
    }
}

impl DragSignal for SharedDrag {
    fn in_progress(&self) -> bool {
        self.active.get()
    }

    fn last_ended_ms(&self) -> Option<u64> {
        self.ended_ms.get()
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("pointer {0} is not capturable")]
    NotCapturable(PointerId),
    #[error("capture unsupported on this platform")]
    Unsupported,
}

pub trait PointerCapture {
    fn capture(&mut self, id: PointerId) -> Result<(), CaptureError>;
    fn release(&mut self, id: PointerId) -> Result<(), CaptureError>;
}

/// Capture for hosts with no such notion.
#[derive(Debug, Default)]
pub struct NoCapture;

impl PointerCapture for NoCapture {
    fn capture(&mut self, _id: PointerId) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported)
    }

    fn release(&mut self, _id: PointerId) -> Result<(), CaptureError> {
        Ok(())
    }
}

/// Capture realised as an exclusive evdev grab of the touch devices.
#[derive(Debug, Clone)]
pub struct GrabCapture {
    req: GrabRequest,
}

impl GrabCapture {
    pub fn new(req: GrabRequest) -> Self {
        Self { req }
    }
}

impl PointerCapture for GrabCapture {
    fn capture(&mut self, _id: PointerId) -> Result<(), CaptureError> {
        self.req.set(Some(true));
        Ok(())
    }

    fn release(&mut self, _id: PointerId) -> Result<(), CaptureError> {
        self.req.set(Some(false));
        Ok(())
    }
}

const BLOCKED: [EventKind; 6] = [
    EventKind::PointerMove,
    EventKind::PointerDown,
    EventKind::MouseMove,
    EventKind::MouseDown,
    EventKind::TouchMove,
    EventKind::TouchStart,
];

const RELEASES: [EventKind; 4] = [
    EventKind::PointerUp,
    EventKind::PointerCancel,
    EventKind::TouchEnd,
    EventKind::TouchCancel,
];

/// Synthetic events that end the source pointer for other subsystems.
fn release_events(
    pointer_id: PointerId,
    device: DeviceClass,
    x: f32,
    y: f32,
    t: u64,
) -> Vec<InputEvent> {
    let kinds: &[EventKind] = match device {
        DeviceClass::Mouse => &[EventKind::PointerUp, EventKind::MouseUp],
        DeviceClass::Touch => &[EventKind::PointerCancel, EventKind::TouchCancel],
        DeviceClass::Pen => &[EventKind::PointerCancel],
    };
    kinds
        .iter()
        .map(|&k| InputEvent::synthetic(k, pointer_id, x, y, t, device))
        .collect()
}

/// Listeners held while a long-press owns the contact. Opened inside the
/// press callback; closed by the next genuine release or host teardown.
#[derive(Debug)]
pub struct SuppressionWindow {
    blockers: Vec<ListenerId>,
    release: Vec<ListenerId>,
}

impl SuppressionWindow {
    pub fn open<D: Document>(
        doc: &mut D,
        pointer_id: PointerId,
        device: DeviceClass,
        at: (f32, f32),
        now_ms: u64,
    ) -> Self {
        let blockers = BLOCKED
            .iter()
            .map(|&k| doc.add_listener(Listener::blocker(k)))
            .collect();
        for ev in release_events(pointer_id, device, at.0, at.1, now_ms) {
            let kind = ev.kind;
            if let Err(e) = doc.dispatch_synthetic(ev) {
                debug!("synthetic {} not delivered: {e}", kind.as_str());
            }
        }
        let release = RELEASES
            .iter()
            .map(|&k| doc.add_listener(Listener::one_shot(k)))
            .collect();
        info!("suppression window open for pointer {pointer_id}");
        Self { blockers, release }
    }

    pub fn is_open(&self) -> bool {
        !self.blockers.is_empty() || !self.release.is_empty()
    }

    /// Whether any of `fired` is this window's release listener.
    pub fn released_by(&self, fired: &[ListenerId]) -> bool {
        fired.iter().any(|id| self.release.contains(id))
    }

    /// Removes every listener still registered. Safe to call repeatedly.
    pub fn close<D: Document>(&mut self, doc: &mut D) {
        if !self.is_open() {
            return;
        }
        for id in self.blockers.drain(..).chain(self.release.drain(..)) {
            // the one-shot that fired has already unregistered itself
            doc.remove_listener(id);
        }
        info!("suppression window closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::EventBus;

    fn raw(kind: EventKind) -> InputEvent {
        InputEvent::new(kind, 7, 10.0, 10.0, 0, DeviceClass::Touch)
    }

    #[test]
    fn open_blocks_moves_and_releases_touch_pointer() {
        let mut bus = EventBus::new();
        let w = SuppressionWindow::open(&mut bus, 7, DeviceClass::Touch, (10.0, 10.0), 500);
        assert!(w.is_open());
        assert_eq!(bus.listener_count(), BLOCKED.len() + RELEASES.len());
        for k in BLOCKED {
            assert!(bus.route(&raw(k)).blocked, "{} not blocked", k.as_str());
        }
        let kinds: Vec<_> = bus.drain_synthetic().iter().map(|e| (e.kind, e.trusted)).collect();
        assert_eq!(
            kinds,
            vec![(EventKind::PointerCancel, false), (EventKind::TouchCancel, false)]
        );
    }

    #[test]
    fn mouse_pointer_gets_pointerup_and_mouseup() {
        let mut bus = EventBus::new();
        let _w = SuppressionWindow::open(&mut bus, 1, DeviceClass::Mouse, (3.0, 4.0), 10);
        let out = bus.drain_synthetic();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].kind, EventKind::PointerUp);
        assert_eq!(out[1].kind, EventKind::MouseUp);
        assert_eq!((out[1].x, out[1].y), (3.0, 4.0));
    }

    #[test]
    fn genuine_release_anywhere_closes_exactly_once() {
        let mut bus = EventBus::new();
        let mut w = SuppressionWindow::open(&mut bus, 7, DeviceClass::Touch, (10.0, 10.0), 500);
        let routed = bus.route(&raw(EventKind::TouchEnd));
        assert!(w.released_by(&routed.fired));
        w.close(&mut bus);
        assert!(!w.is_open());
        assert_eq!(bus.listener_count(), 0);
        w.close(&mut bus);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn drag_end_is_recorded_on_falling_edge() {
        let drag = SharedDrag::new();
        drag.set(false, 5);
        assert_eq!(drag.last_ended_ms(), None);
        drag.set(true, 10);
        assert!(drag.in_progress());
        drag.set(false, 40);
        assert!(!drag.in_progress());
        assert_eq!(drag.last_ended_ms(), Some(40));
    }
}
