use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::document::Document;
use crate::input::{DeviceClass, EventKind, InputEvent, PointerId};
use crate::interop::{DragSignal, PointerCapture, SuppressionWindow};
use crate::swipe::{SwipeDirection, dominant_swipe};
use crate::tracker::{AxisLock, PointerSession, Tracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gesture {
    SwipeLeft,
    SwipeRight,
    SwipeUp,
    SwipeDown,
    Press,
    DoubleTap,
}

impl Gesture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SwipeLeft => "swipeleft",
            Self::SwipeRight => "swiperight",
            Self::SwipeUp => "swipeup",
            Self::SwipeDown => "swipedown",
            Self::Press => "press",
            Self::DoubleTap => "doubletap",
        }
    }
}

impl From<SwipeDirection> for Gesture {
    fn from(d: SwipeDirection) -> Self {
        match d {
            SwipeDirection::Left => Self::SwipeLeft,
            SwipeDirection::Right => Self::SwipeRight,
            SwipeDirection::Up => Self::SwipeUp,
            SwipeDirection::Down => Self::SwipeDown,
        }
    }
}

/// A classified gesture with its originating coordinates and timing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GestureEvent {
    pub gesture: Gesture,
    pub pointer_id: PointerId,
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
    pub start_ms: u64,
    pub duration_ms: u64,
    pub device: DeviceClass,
}

impl GestureEvent {
    fn from_session(gesture: Gesture, s: &PointerSession, now_ms: u64) -> Self {
        let (dx, dy) = s.displacement();
        Self {
            gesture,
            pointer_id: s.pointer_id,
            x: s.origin.0,
            y: s.origin.1,
            dx,
            dy,
            start_ms: s.start_ms,
            duration_ms: s.elapsed_ms(now_ms),
            device: s.device,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TapRecord {
    t_ms: u64,
    x: f32,
    y: f32,
}

/// The last qualifying tap-up, kept across sessions for double-tap pairing.
#[derive(Debug, Default)]
pub struct TapMemory {
    last: Option<TapRecord>,
}

impl TapMemory {
    pub fn record(&mut self, t_ms: u64, x: f32, y: f32) {
        self.last = Some(TapRecord { t_ms, x, y });
    }

    pub fn clear(&mut self) {
        self.last = None;
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }

    /// Whether a contact at (`x`,`y`) starting at `t_ms` pairs with the stored tap.
    pub fn qualifies(&self, th: &Thresholds, t_ms: u64, x: f32, y: f32) -> bool {
        self.last.is_some_and(|r| {
            t_ms.saturating_sub(r.t_ms) <= th.double_tap_ms
                && (x - r.x).hypot(y - r.y) <= th.double_tap_dist
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Swipe(GestureEvent),
    DoubleTap(GestureEvent),
    /// recorded for pairing, nothing emitted
    Tap,
    /// long-press already owned the session
    Pressed,
    Cancelled,
    Unclassified,
}

impl Resolution {
    pub fn gesture(&self) -> Option<&GestureEvent> {
        match self {
            Self::Swipe(g) | Self::DoubleTap(g) => Some(g),
            _ => None,
        }
    }
}

/// Release-time classification of a finished session.
pub fn classify_release(
    s: &PointerSession,
    end_ms: u64,
    th: &Thresholds,
    taps: &mut TapMemory,
) -> Resolution {
    if s.press_fired {
        return Resolution::Pressed;
    }
    if s.cancelled {
        return Resolution::Cancelled;
    }
    let (dx, dy) = s.displacement();
    let duration = s.elapsed_ms(end_ms);

    let tap_ok = s.device != DeviceClass::Mouse
        && dx.abs() <= th.tap_tol
        && dy.abs() <= th.tap_tol
        && duration < th.hold_ms;
    if tap_ok {
        let (x, y) = s.last;
        if s.pending_double_tap && taps.qualifies(th, s.start_ms, x, y) {
            taps.clear();
            return Resolution::DoubleTap(GestureEvent::from_session(Gesture::DoubleTap, s, end_ms));
        }
        taps.record(end_ms, x, y);
        return Resolution::Tap;
    }

    if let Some(dir) = dominant_swipe(dx, dy, duration, th.swipe_min_dist, th.swipe_max_ms) {
        taps.clear();
        return Resolution::Swipe(GestureEvent::from_session(dir.into(), s, end_ms));
    }
    Resolution::Unclassified
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Outcome {
    /// swallowed by a suppression blocker; do not forward to other subsystems
    pub blocked: bool,
    pub resolution: Option<Resolution>,
}

impl Outcome {
    pub fn gesture(&self) -> Option<&GestureEvent> {
        self.resolution.as_ref().and_then(Resolution::gesture)
    }
}

/// Host recognizer: drives the tracker, the long-press timer and the
/// suppression window from the raw event stream.
pub struct GestureDetector<D: Document, S: DragSignal, C: PointerCapture> {
    th: Thresholds,
    tracker: Tracker,
    taps: TapMemory,
    press_deadline: Option<u64>,
    suppression: Option<SuppressionWindow>,
    doc: D,
    drag: S,
    capture: C,
}

impl<D: Document, S: DragSignal, C: PointerCapture> GestureDetector<D, S, C> {
    pub fn new(th: Thresholds, doc: D, drag: S, capture: C) -> Self {
        Self {
            th,
            tracker: Tracker::new(),
            taps: TapMemory::default(),
            press_deadline: None,
            suppression: None,
            doc,
            drag,
            capture,
        }
    }

    /// Applies from the next decision on; the live session is kept.
    pub fn set_thresholds(&mut self, th: Thresholds) {
        self.th = th;
    }

    pub fn document(&self) -> &D {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut D {
        &mut self.doc
    }

    pub fn is_tracking(&self) -> bool {
        self.tracker.is_tracking()
    }

    pub fn press_pending(&self) -> bool {
        self.press_deadline.is_some()
    }

    pub fn suppression_active(&self) -> bool {
        self.suppression.as_ref().is_some_and(SuppressionWindow::is_open)
    }

    pub fn handle(&mut self, ev: &InputEvent) -> Outcome {
        let routed = self.doc.route(ev);
        if self
            .suppression
            .as_ref()
            .is_some_and(|w| w.released_by(&routed.fired))
        {
            self.release_suppression();
        }
        if routed.blocked {
            return Outcome {
                blocked: true,
                resolution: None,
            };
        }
        if !ev.trusted {
            return Outcome::default();
        }

        let resolution = match ev.kind {
            EventKind::PointerDown => {
                self.on_down(ev);
                None
            }
            EventKind::PointerMove => {
                self.on_move(ev);
                None
            }
            EventKind::PointerUp => self.on_up(ev),
            EventKind::PointerCancel | EventKind::LostPointerCapture => self.on_cancel(ev),
            EventKind::DoubleClick => Some(self.on_double_click(ev)),
            _ => None,
        };
        if let Some(g) = resolution.as_ref().and_then(Resolution::gesture) {
            info!("{} at ({:.0},{:.0})", g.gesture.as_str(), g.x, g.y);
        }
        Outcome {
            blocked: false,
            resolution,
        }
    }

    fn axis_lock(&self) -> AxisLock {
        AxisLock {
            min_px: self.th.axis_lock_px,
            ratio: self.th.scroll_cancel_ratio,
        }
    }

    /// Touch contacts that begin just after a drag ended get the larger
    /// tolerance to absorb residual jitter.
    fn press_tolerance(&self, device: DeviceClass, start_ms: u64) -> f32 {
        let recent_drag = self
            .drag
            .last_ended_ms()
            .is_some_and(|t| start_ms.saturating_sub(t) <= self.th.drag_jitter_ms);
        if device == DeviceClass::Touch && recent_drag {
            self.th.move_tol_after_drag
        } else {
            self.th.move_tol
        }
    }

    fn on_down(&mut self, ev: &InputEvent) {
        let now = ev.timestamp_ms;
        let pending = self.taps.qualifies(&self.th, now, ev.x, ev.y);
        let settling = self
            .drag
            .last_ended_ms()
            .is_some_and(|t| now.saturating_sub(t) < self.th.drag_settle_ms);
        let arm = !self.drag.in_progress() && !pending && !settling;

        let Some(s) = self.tracker.on_down(ev) else {
            debug!("pointer {} ignored: another session is active", ev.pointer_id);
            return;
        };
        s.pending_double_tap = pending;
        if let Err(e) = self.capture.capture(ev.pointer_id) {
            debug!("capture of pointer {} failed: {e}", ev.pointer_id);
        }
        self.press_deadline = arm.then(|| now.saturating_add(self.th.hold_ms));
    }

    fn on_move(&mut self, ev: &InputEvent) {
        let Some((device, start)) = self.tracker.session().map(|s| (s.device, s.start_ms)) else {
            return;
        };
        let tol = self.press_tolerance(device, start);
        let dragging = self.drag.in_progress();
        let ratio = self.th.scroll_cancel_ratio;
        let Some(s) = self.tracker.on_move(ev, self.axis_lock()) else {
            return;
        };
        if s.press_fired || s.cancelled {
            return;
        }
        let scrolled = s.locked_axis().is_some() && s.peak_cross() > s.peak_dominant() * ratio;
        if dragging || scrolled {
            debug!(
                "pointer {} cancelled: {}",
                ev.pointer_id,
                if dragging { "drag started" } else { "cross-axis drift" }
            );
            self.cancel_session();
            return;
        }
        let (dx, dy) = s.displacement();
        if self.press_deadline.is_some() && dx.abs().max(dy.abs()) > tol {
            self.press_deadline = None;
        }
    }

    fn on_up(&mut self, ev: &InputEvent) -> Option<Resolution> {
        let s = self.tracker.on_end(ev, self.axis_lock())?;
        self.press_deadline = None;
        self.release_capture(s.pointer_id);
        let res = if self.drag.in_progress() && !s.press_fired {
            Resolution::Cancelled
        } else {
            classify_release(&s, ev.timestamp_ms, &self.th, &mut self.taps)
        };
        debug!("pointer {} resolved: {:?}", s.pointer_id, res);
        Some(res)
    }

    fn on_cancel(&mut self, ev: &InputEvent) -> Option<Resolution> {
        let s = self.tracker.on_end(ev, self.axis_lock())?;
        self.press_deadline = None;
        self.release_capture(s.pointer_id);
        Some(Resolution::Cancelled)
    }

    fn on_double_click(&mut self, ev: &InputEvent) -> Resolution {
        self.taps.clear();
        Resolution::DoubleTap(GestureEvent {
            gesture: Gesture::DoubleTap,
            pointer_id: ev.pointer_id,
            x: ev.x,
            y: ev.y,
            dx: 0.0,
            dy: 0.0,
            start_ms: ev.timestamp_ms,
            duration_ms: 0,
            device: DeviceClass::Mouse,
        })
    }

    /// Marks the live session cancelled; it still absorbs its own events
    /// until the pointer ends.
    fn cancel_session(&mut self) {
        self.press_deadline = None;
        if let Some(s) = self.tracker.session_mut() {
            s.cancelled = true;
        }
    }

    fn release_capture(&mut self, id: PointerId) {
        if let Err(e) = self.capture.release(id) {
            debug!("release of pointer {id} failed: {e}");
        }
    }

    /// Long-press timer. Call from the event loop with the current clock.
    pub fn tick(&mut self, now_ms: u64) -> Option<GestureEvent> {
        let deadline = self.press_deadline?;
        if now_ms < deadline {
            return None;
        }
        self.press_deadline = None;
        if self.drag.in_progress() {
            self.cancel_session();
            return None;
        }

        let s = self.tracker.session()?;
        let (dx, dy) = s.displacement();
        if s.press_fired || dx.abs().max(dy.abs()) > self.press_tolerance(s.device, s.start_ms) {
            return None;
        }
        let ev = GestureEvent::from_session(Gesture::Press, s, now_ms);
        let (id, device, at) = (s.pointer_id, s.device, s.origin);
        if let Some(s) = self.tracker.session_mut() {
            s.press_fired = true;
        }
        self.taps.clear();

        if let Some(mut old) = self.suppression.take() {
            old.close(&mut self.doc);
        }
        self.suppression = Some(SuppressionWindow::open(&mut self.doc, id, device, at, now_ms));
        info!("press at ({:.0},{:.0})", ev.x, ev.y);
        Some(ev)
    }

    /// Tears down the suppression window, if any. Idempotent.
    pub fn release_suppression(&mut self) {
        if let Some(mut w) = self.suppression.take() {
            w.close(&mut self.doc);
        }
    }

    /// Host teardown: drops the session, timer and every document listener.
    pub fn destroy(&mut self) {
        self.release_suppression();
        self.press_deadline = None;
        if let Some(s) = self.tracker.reset() {
            self.release_capture(s.pointer_id);
        }
    }
}

impl<D: Document, S: DragSignal, C: PointerCapture> Drop for GestureDetector<D, S, C> {
    fn drop(&mut self) {
        self.destroy();
    }
}
