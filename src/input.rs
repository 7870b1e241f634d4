//! Raw pointer events & the Linux touchscreen source (evdev 0.13.2 compatible)

use std::{cell::Cell, rc::Rc, time::Instant};

use evdev::{AbsoluteAxisCode, Device, EventType, SynchronizationCode};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Opaque identity correlating all events of one physical contact.
pub type PointerId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mouse,
    Touch,
    Pen,
}

/// DOM-style event types. The recognizer consumes the pointer family;
/// the mouse/touch companions only matter to the document listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    PointerDown,
    PointerMove,
    PointerUp,
    PointerCancel,
    LostPointerCapture,
    MouseDown,
    MouseMove,
    MouseUp,
    TouchStart,
    TouchMove,
    TouchEnd,
    TouchCancel,
    #[serde(rename = "dblclick")]
    DoubleClick,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PointerDown => "pointerdown",
            Self::PointerMove => "pointermove",
            Self::PointerUp => "pointerup",
            Self::PointerCancel => "pointercancel",
            Self::LostPointerCapture => "lostpointercapture",
            Self::MouseDown => "mousedown",
            Self::MouseMove => "mousemove",
            Self::MouseUp => "mouseup",
            Self::TouchStart => "touchstart",
            Self::TouchMove => "touchmove",
            Self::TouchEnd => "touchend",
            Self::TouchCancel => "touchcancel",
            Self::DoubleClick => "dblclick",
        }
    }
}

fn trusted() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    pub kind: EventKind,
    #[serde(default)]
    pub pointer_id: PointerId,
    pub x: f32,
    pub y: f32,
    pub timestamp_ms: u64,
    pub device: DeviceClass,
    /// false for events synthesized by this engine
    #[serde(default = "trusted")]
    pub trusted: bool,
}

impl InputEvent {
    pub fn new(
        kind: EventKind,
        pointer_id: PointerId,
        x: f32,
        y: f32,
        timestamp_ms: u64,
        device: DeviceClass,
    ) -> Self {
        Self {
            kind,
            pointer_id,
            x,
            y,
            timestamp_ms,
            device,
            trusted: true,
        }
    }

    pub fn synthetic(
        kind: EventKind,
        pointer_id: PointerId,
        x: f32,
        y: f32,
        t: u64,
        device: DeviceClass,
    ) -> Self {
        Self {
            trusted: false,
            ..Self::new(kind, pointer_id, x, y, t, device)
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
}

pub fn discover_multitouch() -> Vec<DeviceInfo> {
    let mut out = vec![];
    if let Ok(rd) = std::fs::read_dir("/dev/input") {
        for e in rd.flatten() {
            let p = e.path();
            if p.file_name()
                .and_then(|s| s.to_str())
                .map(|s| s.starts_with("event"))
                .unwrap_or(false)
            {
                if let Ok(dev) = Device::open(&p) {
                    let has_abs = dev.supported_events().contains(EventType::ABSOLUTE);
                    let axes = dev.supported_absolute_axes();
                    let has_mt = axes.map_or(false, |a| {
                        a.contains(AbsoluteAxisCode::ABS_MT_SLOT)
                            && a.contains(AbsoluteAxisCode::ABS_MT_POSITION_X)
                            && a.contains(AbsoluteAxisCode::ABS_MT_POSITION_Y)
                    });
                    if has_abs && has_mt {
                        out.push(DeviceInfo {
                            path: p.display().to_string(),
                            name: dev.name().unwrap_or("unknown").to_string(),
                        });
                    }
                }
            }
        }
    }
    out
}

/// Shared grab request; the recognizer's capture port writes it and the
/// source applies it once per polled batch.
pub type GrabRequest = Rc<Cell<Option<bool>>>;

/// Contact transitions seen inside one SYN_REPORT, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Transition {
    /// position is filled in once the contact's coordinates arrive
    Down(PointerId, Option<(f32, f32)>),
    Up(PointerId, f32, f32),
}

/// Slot 0 of the multitouch protocol as a single pointer. A report may
/// carry several tracking-id changes (lift plus new contact, or a whole
/// tap), so each one is queued and replayed in order at SYN_REPORT.
#[derive(Debug)]
struct SlotDecoder {
    x_max: i32,
    y_max: i32,
    width: f32,
    height: f32,
    cur_slot: i32,
    tracking_id: PointerId,
    pending: Vec<Transition>,
    moved: bool,
    x: f32,
    y: f32,
}

impl SlotDecoder {
    fn new(width: f32, height: f32) -> Self {
        Self {
            x_max: 4096,
            y_max: 4096,
            width,
            height,
            cur_slot: 0,
            tracking_id: -1,
            pending: vec![],
            moved: false,
            x: 0.0,
            y: 0.0,
        }
    }

    fn scale(raw: i32, max: i32, extent: f32) -> f32 {
        (raw as f32 / max.max(1) as f32).clamp(0.0, 1.0) * extent
    }

    fn lift(&mut self) {
        if self.tracking_id < 0 {
            return;
        }
        let id = self.tracking_id;
        if let Some(Transition::Down(d, pos)) = self.pending.last_mut() {
            if *d == id && pos.is_none() {
                *pos = Some((self.x, self.y));
            }
        }
        self.pending.push(Transition::Up(id, self.x, self.y));
        self.tracking_id = -1;
    }

    fn on_abs(&mut self, code: u16, value: i32) {
        match code {
            c if c == AbsoluteAxisCode::ABS_MT_SLOT.0 => self.cur_slot = value,
            _ if self.cur_slot != 0 => {}
            c if c == AbsoluteAxisCode::ABS_MT_TRACKING_ID.0 => {
                if value == self.tracking_id {
                    return;
                }
                // a new id without an explicit -1 still ends the old contact
                self.lift();
                if value >= 0 {
                    self.tracking_id = value;
                    self.pending.push(Transition::Down(value, None));
                }
            }
            c if c == AbsoluteAxisCode::ABS_MT_POSITION_X.0 => {
                self.x = Self::scale(value, self.x_max, self.width);
                self.moved = true;
            }
            c if c == AbsoluteAxisCode::ABS_MT_POSITION_Y.0 => {
                self.y = Self::scale(value, self.y_max, self.height);
                self.moved = true;
            }
            _ => {}
        }
    }

    fn on_syn_report(&mut self, now_ms: u64) -> Vec<InputEvent> {
        let moved = std::mem::take(&mut self.moved);
        let event = |kind, id, x, y| InputEvent::new(kind, id, x, y, now_ms, DeviceClass::Touch);
        if self.pending.is_empty() {
            if moved && self.tracking_id >= 0 {
                return vec![event(EventKind::PointerMove, self.tracking_id, self.x, self.y)];
            }
            return vec![];
        }
        let here = (self.x, self.y);
        self.pending
            .drain(..)
            .map(|t| match t {
                Transition::Down(id, pos) => {
                    let (x, y) = pos.unwrap_or(here);
                    event(EventKind::PointerDown, id, x, y)
                }
                Transition::Up(id, x, y) => event(EventKind::PointerUp, id, x, y),
            })
            .collect()
    }
}

/// Single-contact view of the touchscreen: slot 0 becomes the pointer.
pub struct TouchSource {
    devs: Vec<Device>,
    grab: GrabRequest,
    grabbed: bool,
    start_instant: Instant,
    slot: SlotDecoder,
}

impl TouchSource {
    pub fn open(width: f32, height: f32, grab: GrabRequest) -> Self {
        let mut devs = vec![];
        for d in discover_multitouch() {
            match Device::open(&d.path) {
                Ok(mut dev) => {
                    let _ = dev.set_nonblocking(true);
                    info!("touch source: {} ({})", d.name, d.path);
                    devs.push(dev);
                }
                Err(e) => warn!("failed to open {}: {e}", d.path),
            }
        }
        Self {
            devs,
            grab,
            grabbed: false,
            start_instant: Instant::now(),
            slot: SlotDecoder::new(width, height),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.devs.is_empty()
    }

    pub fn now_ms(&self) -> u64 {
        self.start_instant.elapsed().as_millis() as u64
    }

    /// Drain whatever the devices have buffered. Each SYN_REPORT yields
    /// its contact transitions in order, or a single move.
    pub fn poll(&mut self) -> Vec<InputEvent> {
        let mut out = vec![];
        for i in 0..self.devs.len() {
            let events: Vec<evdev::InputEvent> = match self.devs[i].fetch_events() {
                Ok(evs) => evs.collect(),
                Err(_) => continue,
            };
            for ev in events {
                if ev.event_type() == EventType::ABSOLUTE {
                    self.slot.on_abs(ev.code(), ev.value());
                } else if ev.event_type() == EventType::SYNCHRONIZATION
                    && ev.code() == SynchronizationCode::SYN_REPORT.0
                {
                    let now = self.now_ms();
                    out.extend(self.slot.on_syn_report(now));
                }
            }
        }
        self.apply_grab();
        out
    }

    fn apply_grab(&mut self) {
        let Some(want) = self.grab.take() else {
            return;
        };
        if want && !self.grabbed {
            for d in self.devs.iter_mut() {
                let _ = d.grab();
            }
            self.grabbed = true;
            info!("grabbed touch devices");
        } else if !want && self.grabbed {
            for d in self.devs.iter_mut() {
                let _ = d.ungrab();
            }
            self.grabbed = false;
            info!("released touch devices");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: u16 = AbsoluteAxisCode::ABS_MT_TRACKING_ID.0;
    const X: u16 = AbsoluteAxisCode::ABS_MT_POSITION_X.0;
    const Y: u16 = AbsoluteAxisCode::ABS_MT_POSITION_Y.0;

    fn report(
        slot: &mut SlotDecoder,
        abs: &[(u16, i32)],
        now: u64,
    ) -> Vec<(EventKind, PointerId)> {
        for &(code, value) in abs {
            slot.on_abs(code, value);
        }
        slot.on_syn_report(now).iter().map(|e| (e.kind, e.pointer_id)).collect()
    }

    #[test]
    fn lift_and_new_contact_in_one_report_end_the_old_pointer() {
        let mut slot = SlotDecoder::new(4096.0, 4096.0);
        assert_eq!(
            report(&mut slot, &[(ID, 8), (X, 100), (Y, 100)], 0),
            vec![(EventKind::PointerDown, 8)]
        );
        assert_eq!(
            report(&mut slot, &[(ID, -1), (ID, 9), (X, 900), (Y, 900)], 20),
            vec![(EventKind::PointerUp, 8), (EventKind::PointerDown, 9)]
        );
        assert_eq!(
            report(&mut slot, &[(X, 950)], 30),
            vec![(EventKind::PointerMove, 9)]
        );
    }

    #[test]
    fn old_pointer_lifts_at_its_last_position() {
        let mut slot = SlotDecoder::new(4096.0, 4096.0);
        report(&mut slot, &[(ID, 8), (X, 100), (Y, 200)], 0);
        slot.on_abs(ID, 9);
        slot.on_abs(X, 900);
        let evs = slot.on_syn_report(10);
        assert_eq!((evs[0].x, evs[0].y), (100.0, 200.0));
        assert_eq!((evs[1].x, evs[1].y), (900.0, 200.0));
    }

    #[test]
    fn whole_tap_in_one_report_keeps_its_down() {
        let mut slot = SlotDecoder::new(4096.0, 4096.0);
        let evs = {
            for (code, value) in [(ID, 7), (X, 300), (Y, 400), (ID, -1)] {
                slot.on_abs(code, value);
            }
            slot.on_syn_report(5)
        };
        let kinds: Vec<_> = evs.iter().map(|e| (e.kind, e.pointer_id)).collect();
        assert_eq!(kinds, vec![(EventKind::PointerDown, 7), (EventKind::PointerUp, 7)]);
        assert!(evs.iter().all(|e| (e.x, e.y) == (300.0, 400.0)));
        assert!(report(&mut slot, &[(X, 310)], 10).is_empty());
    }

    #[test]
    fn other_slots_are_ignored() {
        let mut slot = SlotDecoder::new(4096.0, 4096.0);
        let slot_code = AbsoluteAxisCode::ABS_MT_SLOT.0;
        assert!(report(&mut slot, &[(slot_code, 1), (ID, 4), (X, 10)], 0).is_empty());
        assert_eq!(
            report(&mut slot, &[(slot_code, 0), (ID, 5)], 5),
            vec![(EventKind::PointerDown, 5)]
        );
    }
}
