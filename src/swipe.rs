//! Swipe math shared by the host recognizer and the embedded frame
//! recognizer. Everything here is parameterised by primitives only, so
//! the frame copy is driven by exactly the same code path as the host.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    Left,
    Right,
    Up,
    Down,
}

impl SwipeDirection {
    pub fn axis(&self) -> Axis {
        match self {
            Self::Left | Self::Right => Axis::Horizontal,
            Self::Up | Self::Down => Axis::Vertical,
        }
    }
}

/// Release-time swipe rule. Diagonals resolve to the larger axis; a tie
/// goes to horizontal.
pub fn dominant_swipe(
    dx: f32,
    dy: f32,
    duration_ms: u64,
    min_dist: f32,
    max_ms: u64,
) -> Option<SwipeDirection> {
    if duration_ms > max_ms {
        return None;
    }
    let ax = dx.abs();
    let ay = dy.abs();
    if ax >= ay && ax >= min_dist {
        Some(if dx > 0.0 {
            SwipeDirection::Right
        } else {
            SwipeDirection::Left
        })
    } else if ay > ax && ay >= min_dist {
        Some(if dy > 0.0 {
            SwipeDirection::Down
        } else {
            SwipeDirection::Up
        })
    } else {
        None
    }
}

/// Thresholds for the embedded-frame swipe recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwipeParams {
    pub min_distance: f32,
    pub max_duration_ms: u64,
    /// px per ms along the dominant axis
    pub min_velocity: f32,
    /// dominant displacement must be at least this multiple of cross
    pub axis_ratio: f32,
    /// deadzone: shorter contacts are accidental micro-swipes
    pub min_duration_ms: u64,
    /// share of path length travelled along the dominant axis
    pub purity: f32,
    pub angle_tolerance_deg: f32,
    pub reversal_px: f32,
    pub lock_px: f32,
}

impl Default for SwipeParams {
    fn default() -> Self {
        Self {
            min_distance: 50.0,
            max_duration_ms: 800,
            min_velocity: 0.25,
            axis_ratio: 1.5,
            min_duration_ms: 40,
            purity: 0.7,
            angle_tolerance_deg: 30.0,
            reversal_px: 24.0,
            lock_px: 12.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeReject {
    /// travel angle left the locked axis' tolerance cone
    Strayed,
    /// pointer came back past the reversal threshold
    Reversed,
    Deadzone,
    TooSlow,
    TooShort,
    NotDominant,
    Sluggish,
    Impure,
}

#[derive(Debug, Clone)]
pub struct SwipeTrack {
    origin: (f32, f32),
    start_ms: u64,
    last: (f32, f32),
    path: (f32, f32),
    /// locked axis and the sign of travel along it
    lock: Option<(Axis, f32)>,
    extreme: f32,
    rejected: Option<SwipeReject>,
}

fn split(axis: Axis, dx: f32, dy: f32) -> (f32, f32) {
    match axis {
        Axis::Horizontal => (dx, dy),
        Axis::Vertical => (dy, dx),
    }
}

impl SwipeTrack {
    pub fn new(x: f32, y: f32, start_ms: u64) -> Self {
        Self {
            origin: (x, y),
            start_ms,
            last: (x, y),
            path: (0.0, 0.0),
            lock: None,
            extreme: 0.0,
            rejected: None,
        }
    }

    pub fn locked_axis(&self) -> Option<Axis> {
        self.lock.map(|(a, _)| a)
    }

    /// Feed one sample. Once rejected, the track stays rejected.
    pub fn advance(&mut self, p: &SwipeParams, x: f32, y: f32) -> Option<SwipeReject> {
        if self.rejected.is_some() {
            return self.rejected;
        }
        self.path.0 += (x - self.last.0).abs();
        self.path.1 += (y - self.last.1).abs();
        self.last = (x, y);

        let dx = x - self.origin.0;
        let dy = y - self.origin.1;
        if self.lock.is_none() && dx.abs().max(dy.abs()) >= p.lock_px {
            let axis = if dx.abs() >= dy.abs() {
                Axis::Horizontal
            } else {
                Axis::Vertical
            };
            let (along, _) = split(axis, dx, dy);
            self.lock = Some((axis, along.signum()));
        }

        let Some((axis, sign)) = self.lock else {
            return None;
        };
        let (along, cross) = split(axis, dx, dy);
        let along = along * sign;
        self.extreme = self.extreme.max(along);
        if self.extreme - along > p.reversal_px {
            self.rejected = Some(SwipeReject::Reversed);
        } else if cross.abs().atan2(along).to_degrees() > p.angle_tolerance_deg {
            self.rejected = Some(SwipeReject::Strayed);
        }
        self.rejected
    }

    /// Final sample at release; all thresholds must hold.
    pub fn finish(
        &mut self,
        p: &SwipeParams,
        x: f32,
        y: f32,
        end_ms: u64,
    ) -> Result<SwipeDirection, SwipeReject> {
        if let Some(r) = self.advance(p, x, y) {
            return Err(r);
        }
        let duration = end_ms.saturating_sub(self.start_ms);
        if duration < p.min_duration_ms {
            return Err(SwipeReject::Deadzone);
        }
        let dx = x - self.origin.0;
        let dy = y - self.origin.1;
        let dir = dominant_swipe(dx, dy, duration, p.min_distance, p.max_duration_ms).ok_or(
            if duration > p.max_duration_ms {
                SwipeReject::TooSlow
            } else {
                SwipeReject::TooShort
            },
        )?;
        if self.locked_axis().is_some_and(|a| a != dir.axis()) {
            return Err(SwipeReject::Strayed);
        }
        let (along, cross) = split(dir.axis(), dx.abs(), dy.abs());
        if along < p.axis_ratio * cross {
            return Err(SwipeReject::NotDominant);
        }
        if along / (duration.max(1) as f32) < p.min_velocity {
            return Err(SwipeReject::Sluggish);
        }
        let (path_along, path_cross) = split(dir.axis(), self.path.0, self.path.1);
        let total = path_along + path_cross;
        if total > 0.0 && path_along / total < p.purity {
            return Err(SwipeReject::Impure);
        }
        Ok(dir)
    }
}
