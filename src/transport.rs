//! Where classified output goes: straight to in-process consumers for the
//! host recognizer, or as posted messages out of an embedded frame.

use std::{io::Write, sync::mpsc::Sender};

use log::warn;
use serde::Serialize;
use thiserror::Error;

use crate::gestures::GestureEvent;

/// Direct emission to the host's consumers.
pub trait GestureSink {
    fn deliver(&mut self, ev: &GestureEvent);
}

impl GestureSink for Vec<GestureEvent> {
    fn deliver(&mut self, ev: &GestureEvent) {
        self.push(ev.clone());
    }
}

/// Writes each delivered item as one JSON line.
pub struct JsonLines<W: Write> {
    out: W,
}

impl<W: Write> JsonLines<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write<T: Serialize>(&mut self, item: &T) {
        let res = serde_json::to_string(item)
            .map_err(std::io::Error::from)
            .and_then(|line| writeln!(self.out, "{line}"));
        if let Err(e) = res {
            warn!("output write failed: {e}");
        }
    }
}

impl<W: Write> GestureSink for JsonLines<W> {
    fn deliver(&mut self, ev: &GestureEvent) {
        self.write(ev);
    }
}

#[derive(Debug, Error)]
pub enum PortError {
    #[error("message channel closed")]
    Closed,
}

/// postMessage-style channel from an embedded frame to its host.
pub trait MessagePort {
    fn post(&self, msg: String) -> Result<(), PortError>;
}

impl MessagePort for Sender<String> {
    fn post(&self, msg: String) -> Result<(), PortError> {
        self.send(msg).map_err(|_| PortError::Closed)
    }
}
