//! Single-pointer session tracking.

use crate::input::{DeviceClass, InputEvent, PointerId};
use crate::swipe::Axis;

/// When a session commits to an axis: the leading axis must have moved at
/// least `min_px` and lead the other by `ratio`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLock {
    pub min_px: f32,
    pub ratio: f32,
}

#[derive(Debug, Clone)]
pub struct PointerSession {
    pub pointer_id: PointerId,
    pub origin: (f32, f32),
    pub start_ms: u64,
    pub device: DeviceClass,
    pub press_fired: bool,
    pub cancelled: bool,
    /// second contact of a potential double-tap; decided at pointer-down
    pub pending_double_tap: bool,
    pub last: (f32, f32),
    pub last_ms: u64,
    // internal
    peak_x: f32,
    peak_y: f32,
    locked: Option<Axis>,
}

impl PointerSession {
    fn new(ev: &InputEvent) -> Self {
        Self {
            pointer_id: ev.pointer_id,
            origin: (ev.x, ev.y),
            start_ms: ev.timestamp_ms,
            device: ev.device,
            press_fired: false,
            cancelled: false,
            pending_double_tap: false,
            last: (ev.x, ev.y),
            last_ms: ev.timestamp_ms,
            peak_x: 0.0,
            peak_y: 0.0,
            locked: None,
        }
    }

    pub fn displacement(&self) -> (f32, f32) {
        (self.last.0 - self.origin.0, self.last.1 - self.origin.1)
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.start_ms)
    }

    /// Axis committed to once displacement crossed the lock threshold.
    pub fn locked_axis(&self) -> Option<Axis> {
        self.locked
    }

    fn dominant(&self) -> Axis {
        self.locked.unwrap_or(if self.peak_x >= self.peak_y {
            Axis::Horizontal
        } else {
            Axis::Vertical
        })
    }

    /// Largest displacement seen so far along the dominant axis.
    pub fn peak_dominant(&self) -> f32 {
        match self.dominant() {
            Axis::Horizontal => self.peak_x,
            Axis::Vertical => self.peak_y,
        }
    }

    /// Largest displacement seen so far across the dominant axis.
    pub fn peak_cross(&self) -> f32 {
        match self.dominant() {
            Axis::Horizontal => self.peak_y,
            Axis::Vertical => self.peak_x,
        }
    }

    fn advance(&mut self, ev: &InputEvent, lock: AxisLock) {
        self.last = (ev.x, ev.y);
        self.last_ms = ev.timestamp_ms;
        let (dx, dy) = self.displacement();
        self.peak_x = self.peak_x.max(dx.abs());
        self.peak_y = self.peak_y.max(dy.abs());
        if self.locked.is_some() {
            return;
        }
        let (major, minor, axis) = if dx.abs() >= dy.abs() {
            (dx.abs(), dy.abs(), Axis::Horizontal)
        } else {
            (dy.abs(), dx.abs(), Axis::Vertical)
        };
        // near-diagonal samples stay unlocked until one axis pulls ahead
        if major >= lock.min_px && major >= minor * lock.ratio {
            self.locked = Some(axis);
        }
    }
}

/// Owns the one live session. A second pointer-down while tracking is
/// ignored, and moves/ends for other pointer identities are dropped.
#[derive(Debug, Default)]
pub struct Tracker {
    session: Option<PointerSession>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tracking(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&PointerSession> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut PointerSession> {
        self.session.as_mut()
    }

    pub fn on_down(&mut self, ev: &InputEvent) -> Option<&mut PointerSession> {
        if self.session.is_some() {
            return None;
        }
        self.session = Some(PointerSession::new(ev));
        self.session.as_mut()
    }

    pub fn on_move(&mut self, ev: &InputEvent, lock: AxisLock) -> Option<&mut PointerSession> {
        let s = self.session.as_mut().filter(|s| s.pointer_id == ev.pointer_id)?;
        s.advance(ev, lock);
        Some(s)
    }

    /// Ends the session for `ev`'s pointer, folding in its final position.
    pub fn on_end(&mut self, ev: &InputEvent, lock: AxisLock) -> Option<PointerSession> {
        if self.session.as_ref()?.pointer_id != ev.pointer_id {
            return None;
        }
        let mut s = self.session.take()?;
        s.advance(ev, lock);
        Some(s)
    }

    pub fn reset(&mut self) -> Option<PointerSession> {
        self.session.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::EventKind;

    const LOCK: AxisLock = AxisLock {
        min_px: 10.0,
        ratio: 1.5,
    };

    fn ev(kind: EventKind, id: PointerId, x: f32, y: f32, t: u64) -> InputEvent {
        InputEvent::new(kind, id, x, y, t, DeviceClass::Touch)
    }

    #[test]
    fn second_pointer_down_is_ignored() {
        let mut tr = Tracker::new();
        assert!(tr.on_down(&ev(EventKind::PointerDown, 1, 0.0, 0.0, 0)).is_some());
        assert!(tr.on_down(&ev(EventKind::PointerDown, 2, 50.0, 50.0, 5)).is_none());
        assert_eq!(tr.session().map(|s| s.pointer_id), Some(1));
    }

    #[test]
    fn moves_from_other_pointers_are_dropped() {
        let mut tr = Tracker::new();
        tr.on_down(&ev(EventKind::PointerDown, 1, 0.0, 0.0, 0));
        assert!(tr.on_move(&ev(EventKind::PointerMove, 9, 80.0, 0.0, 10), LOCK).is_none());
        assert_eq!(tr.session().map(|s| s.displacement()), Some((0.0, 0.0)));
        assert!(tr.on_end(&ev(EventKind::PointerUp, 9, 80.0, 0.0, 20), LOCK).is_none());
        assert!(tr.is_tracking());
    }

    #[test]
    fn peaks_are_monotonic_while_tracking() {
        let mut tr = Tracker::new();
        tr.on_down(&ev(EventKind::PointerDown, 1, 100.0, 100.0, 0));
        let mut last_dom = 0.0;
        let mut last_cross = 0.0;
        for (x, y) in [(130.0, 104.0), (110.0, 96.0), (160.0, 90.0), (100.0, 100.0)] {
            let s = tr.on_move(&ev(EventKind::PointerMove, 1, x, y, 10), LOCK).unwrap();
            assert!(s.peak_dominant() >= last_dom);
            assert!(s.peak_cross() >= last_cross);
            last_dom = s.peak_dominant();
            last_cross = s.peak_cross();
        }
        let s = tr.session().unwrap();
        assert_eq!(s.locked_axis(), Some(Axis::Horizontal));
        assert_eq!(s.peak_dominant(), 60.0);
        assert_eq!(s.peak_cross(), LOCK);
        assert_eq!(s.displacement(), (0.0, 0.0));
    }

    #[test]
    fn end_returns_final_displacement_and_clears() {
        let mut tr = Tracker::new();
        tr.on_down(&ev(EventKind::PointerDown, 3, 10.0, 10.0, 0));
        let s = tr.on_end(&ev(EventKind::PointerUp, 3, 10.0, 55.0, 90), LOCK).unwrap();
        assert_eq!(s.displacement(), (0.0, 45.0));
        assert_eq!(s.locked_axis(), Some(Axis::Vertical));
        assert!(!tr.is_tracking());
    }

    #[test]
    fn near_diagonal_start_defers_the_lock() {
        let mut tr = Tracker::new();
        tr.on_down(&ev(EventKind::PointerDown, 1, 100.0, 100.0, 0));
        let s = tr.on_move(&ev(EventKind::PointerMove, 1, 110.0, 109.0, 30), LOCK).unwrap();
        assert_eq!(s.locked_axis(), None);
        let s = tr.on_move(&ev(EventKind::PointerMove, 1, 112.0, 140.0, 90), LOCK).unwrap();
        assert_eq!(s.locked_axis(), Some(Axis::Vertical));
        assert_eq!(s.peak_dominant(), 40.0);
        assert_eq!(s.peak_cross(), 12.0);
    }
}
