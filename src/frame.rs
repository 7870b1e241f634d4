//! Embedded frame recognizer.
//!
//! A sandboxed frame cannot share modules or dispatch events into its
//! host. It gets a generated script with its configuration baked in, runs
//! the swipe subset of the recognizer against it, and reports back only
//! through posted, serialized messages tagged with its instance id.

use std::{
    str::FromStr,
    sync::mpsc::{self, Sender},
    thread,
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::FrameConfig;
use crate::gestures::Gesture;
use crate::input::{DeviceClass, EventKind, InputEvent, PointerId};
use crate::swipe::{SwipeParams, SwipeTrack};
use crate::transport::MessagePort;

/// DOM-shaped key event, forwarded verbatim as `keyEventData`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyInput {
    pub key: String,
    pub code: String,
    pub ctrl_key: bool,
    pub shift_key: bool,
    pub alt_key: bool,
    pub meta_key: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChordError {
    #[error("missing key")]
    MissingKey,
    #[error("unknown modifier '{0}'")]
    UnknownModifier(String),
}

/// A chord like "ctrl+shift+p"; modifiers first, key last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyChord {
    ctrl: bool,
    alt: bool,
    shift: bool,
    meta: bool,
    key: String,
}

impl KeyChord {
    pub fn has_modifier(&self) -> bool {
        self.ctrl || self.alt || self.shift || self.meta
    }

    pub fn matches(&self, k: &KeyInput) -> bool {
        k.key.to_lowercase() == self.key
            && k.ctrl_key == self.ctrl
            && k.alt_key == self.alt
            && k.shift_key == self.shift
            && k.meta_key == self.meta
    }
}

impl FromStr for KeyChord {
    type Err = ChordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<_> = s.split('+').map(|p| p.trim().to_lowercase()).collect();
        let Some((key, mods)) = parts.split_last() else {
            return Err(ChordError::MissingKey);
        };
        if key.is_empty() {
            return Err(ChordError::MissingKey);
        }
        let mut chord = KeyChord {
            key: key.clone(),
            ..Default::default()
        };
        for m in mods {
            match m.as_str() {
                "ctrl" | "control" => chord.ctrl = true,
                "alt" | "option" => chord.alt = true,
                "shift" => chord.shift = true,
                "meta" | "cmd" | "super" | "win" => chord.meta = true,
                other => return Err(ChordError::UnknownModifier(other.to_string())),
            }
        }
        Ok(chord)
    }
}

/// `eventData` of a posted swipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwipeData {
    pub start_x: f32,
    pub start_y: f32,
    pub end_x: f32,
    pub end_y: f32,
    pub duration_ms: u64,
    pub velocity: f32,
    pub pointer_type: DeviceClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMessageType {
    Keydown,
}

/// The one message shape a frame posts to its host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameMessage {
    #[serde(rename_all = "camelCase")]
    Gesture {
        gesture: Gesture,
        event_data: SwipeData,
        instance_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Key {
        #[serde(rename = "type")]
        kind: KeyMessageType,
        key_event_data: KeyInput,
        instance_id: String,
    },
}

impl FrameMessage {
    pub fn instance_id(&self) -> &str {
        match self {
            Self::Gesture { instance_id, .. } | Self::Key { instance_id, .. } => instance_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("malformed frame script: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("bad forwarded key '{chord}': {source}")]
    Key { chord: String, source: ChordError },
    #[error("frame thread failed to start: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Everything baked into a frame at injection time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameBootstrap {
    instance_id: String,
    swipe: SwipeParams,
    forward_keys: Vec<String>,
}

/// Generates the self-contained script text for one frame instance.
pub fn generate_script(instance_id: &str, cfg: &FrameConfig) -> Result<String, ScriptError> {
    let boot = FrameBootstrap {
        instance_id: instance_id.to_string(),
        swipe: cfg.swipe.clone(),
        forward_keys: cfg.forward_keys.clone(),
    };
    Ok(serde_json::to_string_pretty(&boot)?)
}

struct Contact {
    pointer_id: PointerId,
    device: DeviceClass,
    start: (f32, f32),
    start_ms: u64,
    track: SwipeTrack,
}

pub struct FrameRecognizer<P: MessagePort> {
    instance_id: String,
    params: SwipeParams,
    keys: Vec<KeyChord>,
    active: Option<Contact>,
    port: P,
}

impl<P: MessagePort> FrameRecognizer<P> {
    pub fn inject(script: &str, port: P) -> Result<Self, ScriptError> {
        let boot: FrameBootstrap = serde_json::from_str(script)?;
        let keys = boot
            .forward_keys
            .iter()
            .map(|k| {
                k.parse().map_err(|source| ScriptError::Key {
                    chord: k.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<KeyChord>, _>>()?;
        Ok(Self {
            instance_id: boot.instance_id,
            params: boot.swipe,
            keys,
            active: None,
            port,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn on_pointer(&mut self, ev: &InputEvent) {
        let same = self.active.as_ref().is_some_and(|c| c.pointer_id == ev.pointer_id);
        match ev.kind {
            EventKind::PointerDown if self.active.is_none() => {
                self.active = Some(Contact {
                    pointer_id: ev.pointer_id,
                    device: ev.device,
                    start: (ev.x, ev.y),
                    start_ms: ev.timestamp_ms,
                    track: SwipeTrack::new(ev.x, ev.y, ev.timestamp_ms),
                });
            }
            EventKind::PointerMove if same => {
                if let Some(c) = self.active.as_mut() {
                    c.track.advance(&self.params, ev.x, ev.y);
                }
            }
            EventKind::PointerUp if same => {
                if let Some(mut c) = self.active.take() {
                    match c.track.finish(&self.params, ev.x, ev.y, ev.timestamp_ms) {
                        Ok(dir) => {
                            let duration_ms = ev.timestamp_ms.saturating_sub(c.start_ms);
                            let dist = (ev.x - c.start.0).hypot(ev.y - c.start.1);
                            self.post(FrameMessage::Gesture {
                                gesture: dir.into(),
                                event_data: SwipeData {
                                    start_x: c.start.0,
                                    start_y: c.start.1,
                                    end_x: ev.x,
                                    end_y: ev.y,
                                    duration_ms,
                                    velocity: dist / duration_ms.max(1) as f32,
                                    pointer_type: c.device,
                                },
                                instance_id: self.instance_id.clone(),
                            });
                        }
                        Err(r) => debug!("frame {}: swipe rejected ({r:?})", self.instance_id),
                    }
                }
            }
            EventKind::PointerCancel | EventKind::LostPointerCapture if same => {
                self.active = None;
            }
            _ => {}
        }
    }

    /// Forwards configured modifier chords; returns whether `key` was sent.
    pub fn on_key(&mut self, key: &KeyInput) -> bool {
        if !self.keys.iter().any(|c| c.matches(key)) {
            return false;
        }
        self.post(FrameMessage::Key {
            kind: KeyMessageType::Keydown,
            key_event_data: key.clone(),
            instance_id: self.instance_id.clone(),
        });
        true
    }

    fn post(&self, msg: FrameMessage) {
        let res = serde_json::to_string(&msg)
            .map_err(|e| e.to_string())
            .and_then(|s| self.port.post(s).map_err(|e| e.to_string()));
        // not retried: a dropped message is a lost gesture
        if let Err(e) = res {
            debug!("frame {}: message dropped: {e}", self.instance_id);
        }
    }
}

pub enum FrameInput {
    Pointer(InputEvent),
    Key(KeyInput),
}

/// A frame recognizer running isolated on its own thread.
pub struct FrameHandle {
    tx: Sender<FrameInput>,
    thread: thread::JoinHandle<()>,
}

impl FrameHandle {
    pub fn send(&self, input: FrameInput) {
        if self.tx.send(input).is_err() {
            warn!("frame thread gone; input dropped");
        }
    }

    /// Closes the input channel and waits for the frame to drain.
    pub fn shutdown(self) {
        drop(self.tx);
        if self.thread.join().is_err() {
            warn!("frame thread panicked");
        }
    }
}

pub fn spawn<P: MessagePort + Send + 'static>(
    script: &str,
    port: P,
) -> Result<FrameHandle, ScriptError> {
    let mut rec = FrameRecognizer::inject(script, port)?;
    let (tx, rx) = mpsc::channel::<FrameInput>();
    let thread = thread::Builder::new()
        .name(format!("frame-{}", rec.instance_id()))
        .spawn(move || {
            for input in rx {
                match input {
                    FrameInput::Pointer(ev) => rec.on_pointer(&ev),
                    FrameInput::Key(k) => {
                        rec.on_key(&k);
                    }
                }
            }
        })?;
    Ok(FrameHandle { tx, thread })
}

/// Host side of one embedded frame: accepts only its own messages.
#[derive(Debug, Clone)]
pub struct FrameHost {
    instance_id: String,
}

impl FrameHost {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
        }
    }

    pub fn accept(&self, raw: &str) -> Option<FrameMessage> {
        let msg: FrameMessage = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(e) => {
                debug!("unparseable frame message: {e}");
                return None;
            }
        };
        (msg.instance_id() == self.instance_id).then_some(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(id: &str) -> String {
        generate_script(id, &FrameConfig::default()).unwrap()
    }

    fn ev(kind: EventKind, x: f32, y: f32, t: u64) -> InputEvent {
        InputEvent::new(kind, 5, x, y, t, DeviceClass::Touch)
    }

    fn swipe_right<P: MessagePort>(rec: &mut FrameRecognizer<P>) {
        rec.on_pointer(&ev(EventKind::PointerDown, 10.0, 100.0, 0));
        rec.on_pointer(&ev(EventKind::PointerMove, 40.0, 101.0, 40));
        rec.on_pointer(&ev(EventKind::PointerMove, 90.0, 102.0, 80));
        rec.on_pointer(&ev(EventKind::PointerUp, 130.0, 102.0, 120));
    }

    #[test]
    fn chord_parsing() {
        let c: KeyChord = "Ctrl+Shift+P".parse().unwrap();
        assert!(c.has_modifier());
        let k = KeyInput {
            key: "P".into(),
            ctrl_key: true,
            shift_key: true,
            ..Default::default()
        };
        assert!(c.matches(&k));
        assert!(!c.matches(&KeyInput { shift_key: false, ..k }));
        assert!(!"k".parse::<KeyChord>().unwrap().has_modifier());
        assert_eq!("ctrl+".parse::<KeyChord>(), Err(ChordError::MissingKey));
        assert_eq!(
            "hyper+k".parse::<KeyChord>(),
            Err(ChordError::UnknownModifier("hyper".into()))
        );
    }

    #[test]
    fn script_bakes_configuration() {
        let mut cfg = FrameConfig::default();
        cfg.swipe.min_distance = 77.0;
        let text = generate_script("frame-a", &cfg).unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["instanceId"], "frame-a");
        assert_eq!(v["swipe"]["min_distance"], 77.0);
        let (tx, _rx) = mpsc::channel();
        let rec = FrameRecognizer::inject(&text, tx).unwrap();
        assert_eq!(rec.params.min_distance, 77.0);
    }

    #[test]
    fn swipe_is_posted_with_instance_id() {
        let (tx, rx) = mpsc::channel();
        let mut rec = FrameRecognizer::inject(&script("f1"), tx).unwrap();
        swipe_right(&mut rec);
        let raw = rx.try_recv().unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["gesture"], "swiperight");
        assert_eq!(v["instanceId"], "f1");
        assert_eq!(v["eventData"]["durationMs"], 120);
        assert_eq!(v["eventData"]["pointerType"], "touch");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rejected_path_posts_nothing() {
        let (tx, rx) = mpsc::channel();
        let mut rec = FrameRecognizer::inject(&script("f1"), tx).unwrap();
        rec.on_pointer(&ev(EventKind::PointerDown, 0.0, 0.0, 0));
        rec.on_pointer(&ev(EventKind::PointerMove, 80.0, 0.0, 60));
        rec.on_pointer(&ev(EventKind::PointerMove, 30.0, 0.0, 120));
        rec.on_pointer(&ev(EventKind::PointerUp, 100.0, 0.0, 200));
        assert!(rx.try_recv().is_err());
        // the recognizer is free for the next contact
        swipe_right(&mut rec);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn other_pointers_are_ignored() {
        let (tx, rx) = mpsc::channel();
        let mut rec = FrameRecognizer::inject(&script("f1"), tx).unwrap();
        rec.on_pointer(&ev(EventKind::PointerDown, 0.0, 0.0, 0));
        let mut other = ev(EventKind::PointerUp, 200.0, 0.0, 100);
        other.pointer_id = 6;
        rec.on_pointer(&other);
        assert!(rx.try_recv().is_err());
        rec.on_pointer(&ev(EventKind::PointerCancel, 0.0, 0.0, 120));
        assert!(rec.active.is_none());
    }

    #[test]
    fn only_configured_chords_are_forwarded() {
        let (tx, rx) = mpsc::channel();
        let mut rec = FrameRecognizer::inject(&script("f2"), tx).unwrap();
        let plain = KeyInput {
            key: "k".into(),
            ..Default::default()
        };
        assert!(!rec.on_key(&plain));
        let chord = KeyInput {
            ctrl_key: true,
            code: "KeyK".into(),
            ..plain
        };
        assert!(rec.on_key(&chord));
        let msg = FrameHost::new("f2").accept(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(
            msg,
            FrameMessage::Key {
                kind: KeyMessageType::Keydown,
                key_event_data: chord,
                instance_id: "f2".into(),
            }
        );
    }

    #[test]
    fn host_filters_by_instance_id() {
        let (tx, rx) = mpsc::channel();
        let mut a = FrameRecognizer::inject(&script("a"), tx.clone()).unwrap();
        let mut b = FrameRecognizer::inject(&script("b"), tx).unwrap();
        swipe_right(&mut a);
        swipe_right(&mut b);
        let host_b = FrameHost::new("b");
        let accepted: Vec<_> = rx.try_iter().filter_map(|m| host_b.accept(&m)).collect();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].instance_id(), "b");
        assert!(host_b.accept("not json").is_none());
        assert!(host_b.accept(r#"{"type":"keyup","instanceId":"b"}"#).is_none());
    }

    #[test]
    fn closed_port_drops_silently() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut rec = FrameRecognizer::inject(&script("f"), tx).unwrap();
        swipe_right(&mut rec);
        assert!(rec.active.is_none());
    }

    #[test]
    fn bad_script_is_rejected() {
        let (tx, _rx) = mpsc::channel::<String>();
        assert!(matches!(
            FrameRecognizer::inject("{", tx.clone()),
            Err(ScriptError::Parse(_))
        ));
        let bad = r#"{"instanceId":"x","swipe":{},"forwardKeys":["bogus+k"]}"#;
        assert!(matches!(
            FrameRecognizer::inject(bad, tx),
            Err(ScriptError::Key { .. })
        ));
    }

    #[test]
    fn spawned_frame_runs_isolated() {
        let (tx, rx) = mpsc::channel();
        let handle = spawn(&script("iso"), tx).unwrap();
        for (kind, x, t) in [
            (EventKind::PointerDown, 10.0, 0),
            (EventKind::PointerMove, 60.0, 50),
            (EventKind::PointerUp, 120.0, 100),
        ] {
            handle.send(FrameInput::Pointer(ev(kind, x, 50.0, t)));
        }
        handle.shutdown();
        let msg = FrameHost::new("iso").accept(&rx.recv().unwrap()).unwrap();
        assert!(matches!(
            msg,
            FrameMessage::Gesture {
                gesture: Gesture::SwipeRight,
                ..
            }
        ));
    }
}
