use anyhow::{Context, Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::frame::KeyChord;
use crate::swipe::SwipeParams;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
}

/// Host recognizer thresholds. Distances in px, durations in ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub swipe_min_dist: f32,
    pub swipe_max_ms: u64,
    /// long-press duration
    pub hold_ms: u64,
    pub double_tap_ms: u64,
    pub double_tap_dist: f32,
    pub tap_tol: f32,
    /// press-move tolerance
    pub move_tol: f32,
    /// press-move tolerance for touch shortly after a drag ended
    pub move_tol_after_drag: f32,
    pub drag_jitter_ms: u64,
    /// no long-press arming this soon after a drag ended
    pub drag_settle_ms: u64,
    pub axis_lock_px: f32,
    /// cross-axis peak above this multiple of the dominant peak cancels
    pub scroll_cancel_ratio: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            swipe_min_dist: 30.0,
            swipe_max_ms: 600,
            hold_ms: 500,
            double_tap_ms: 300,
            double_tap_dist: 30.0,
            tap_tol: 20.0,
            move_tol: 10.0,
            move_tol_after_drag: 30.0,
            drag_jitter_ms: 350,
            drag_settle_ms: 120,
            axis_lock_px: 10.0,
            scroll_cancel_ratio: 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub swipe: SwipeParams,
    pub forward_keys: Vec<String>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            swipe: SwipeParams::default(),
            forward_keys: ["ctrl+k", "meta+k", "ctrl+shift+p", "meta+shift+p"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub frame: FrameConfig,
}

impl Profile {
    pub fn parse(txt: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(txt)?;
        validate_profile(&profile)?;
        Ok(profile)
    }

    pub fn display_name(&self) -> &str {
        self.meta.name.as_deref().unwrap_or("unnamed")
    }
}

fn config_dir() -> Option<PathBuf> {
    let home = UserDirs::new()?.home_dir().to_path_buf();
    Some(home.join(".config").join("gesturectl"))
}

pub fn profiles_dir() -> Option<PathBuf> {
    config_dir().map(|d| d.join("profiles"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

/// A profile plus the file it came from (None for the built-in one).
#[derive(Debug, Clone)]
pub struct LoadedProfile {
    pub profile: Profile,
    pub source: Option<PathBuf>,
}

impl LoadedProfile {
    /// `arg` is a path to a `.toml` file or a profile name; None means
    /// the user's `default` profile, falling back to the built-in one.
    pub fn resolve(arg: Option<&str>) -> Result<Self> {
        let path = match arg {
            Some(a) if a.ends_with(".toml") || Path::new(a).is_file() => Some(PathBuf::from(a)),
            Some(name) => {
                let dir = profiles_dir().ok_or_else(|| anyhow!("no home directory"))?;
                let p = dir.join(format!("{name}.toml"));
                if !p.exists() {
                    return Err(anyhow!("profile not found: {}", p.display()));
                }
                Some(p)
            }
            None => profiles_dir()
                .map(|d| d.join("default.toml"))
                .filter(|p| p.exists()),
        };
        match path {
            Some(p) => {
                let profile = load_profile(&p)?;
                info!("loaded profile '{}' from {}", profile.display_name(), p.display());
                Ok(Self {
                    profile,
                    source: Some(p),
                })
            }
            None => Ok(Self {
                profile: Profile::parse(default_profile_text())
                    .context("built-in default profile")?,
                source: None,
            }),
        }
    }

    pub fn reload(&mut self) -> Result<()> {
        if let Some(p) = &self.source {
            self.profile = load_profile(p)?;
        }
        Ok(())
    }
}

fn load_profile(path: &Path) -> Result<Profile> {
    let txt = fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    Profile::parse(&txt).map_err(|e| anyhow!("failed to parse {}: {e}", path.display()))
}

pub fn list_profiles() -> Vec<String> {
    let mut v = Vec::new();
    let Some(dir) = profiles_dir() else {
        return v;
    };
    if let Ok(rd) = fs::read_dir(dir) {
        for e in rd.flatten() {
            if e.path().extension().is_some_and(|ext| ext == "toml") {
                if let Some(stem) = e.path().file_stem().and_then(|s| s.to_str()) {
                    v.push(stem.to_string());
                }
            }
        }
    }
    v.sort();
    v
}

pub fn doctor_report() -> serde_json::Value {
    let devices: Vec<String> = crate::input::discover_multitouch()
        .into_iter()
        .map(|d| format!("{} ({})", d.name, d.path))
        .collect();
    serde_json::json!({
        "input_group_member": check_in_input_group(),
        "devices": devices,
        "profiles_dir": profiles_dir(),
        "profiles": list_profiles(),
        "hints": {
            "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input"
        }
    })
}

fn check_in_input_group() -> bool {
    let Ok(s) = fs::read_to_string("/etc/group") else {
        return false;
    };
    let user = whoami::username();
    s.lines()
        .filter(|line| line.starts_with("input:"))
        .any(|line| line.split(':').nth(3).unwrap_or("").split(',').any(|u| u == user))
}

fn validate_profile(p: &Profile) -> Result<()> {
    let th = &p.thresholds;
    if th.swipe_max_ms == 0 || th.hold_ms == 0 || th.double_tap_ms == 0 {
        return Err(anyhow!("thresholds must be positive durations"));
    }
    if th.swipe_min_dist <= 0.0 || th.double_tap_dist <= 0.0 || th.axis_lock_px <= 0.0 {
        return Err(anyhow!("thresholds distances must be positive"));
    }
    if th.tap_tol < 0.0 || th.move_tol < 0.0 {
        return Err(anyhow!("thresholds.tap_tol and move_tol must be >= 0"));
    }
    if th.move_tol_after_drag < th.move_tol {
        return Err(anyhow!("thresholds.move_tol_after_drag must be >= move_tol"));
    }
    if th.scroll_cancel_ratio < 1.0 {
        return Err(anyhow!("thresholds.scroll_cancel_ratio must be >= 1"));
    }

    let sw = &p.frame.swipe;
    if sw.min_distance <= 0.0 || sw.max_duration_ms == 0 || sw.lock_px <= 0.0 {
        return Err(anyhow!("frame.swipe distances and durations must be positive"));
    }
    if sw.min_duration_ms >= sw.max_duration_ms {
        return Err(anyhow!("frame.swipe.min_duration_ms must be below max_duration_ms"));
    }
    if !(sw.purity > 0.0 && sw.purity <= 1.0) {
        return Err(anyhow!("frame.swipe.purity must be in (0,1]"));
    }
    if !(sw.angle_tolerance_deg > 0.0 && sw.angle_tolerance_deg < 90.0) {
        return Err(anyhow!("frame.swipe.angle_tolerance_deg must be in (0,90)"));
    }
    if sw.axis_ratio < 1.0 || sw.min_velocity < 0.0 || sw.reversal_px < 0.0 {
        return Err(anyhow!(
            "frame.swipe.axis_ratio must be >= 1, min_velocity and reversal_px >= 0"
        ));
    }

    for k in &p.frame.forward_keys {
        let chord: KeyChord = k
            .parse()
            .map_err(|e| anyhow!("frame.forward_keys '{k}': {e}"))?;
        if !chord.has_modifier() {
            return Err(anyhow!("frame.forward_keys '{k}' needs a modifier"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_profile_is_valid() {
        let p = Profile::parse(default_profile_text()).unwrap();
        assert_eq!(p.display_name(), "default");
        assert_eq!(p.thresholds, Thresholds::default());
        assert_eq!(p.frame.swipe, SwipeParams::default());
        assert_eq!(p.frame.forward_keys.len(), 6);
    }

    #[test]
    fn empty_profile_takes_defaults() {
        let p = Profile::parse("").unwrap();
        assert_eq!(p.thresholds.hold_ms, 500);
        assert_eq!(p.display_name(), "unnamed");
    }

    #[test]
    fn partial_override_keeps_other_fields() {
        let text = "[thresholds]\nhold_ms = 800\n[frame.swipe]\npurity = 0.9\n";
        let p = Profile::parse(text).unwrap();
        assert_eq!(p.thresholds.hold_ms, 800);
        assert_eq!(p.thresholds.swipe_min_dist, 30.0);
        assert_eq!(p.frame.swipe.purity, 0.9);
        assert_eq!(p.frame.swipe.lock_px, 12.0);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Profile::parse("[thresholds]\nhold_ms = 0\n").is_err());
        assert!(Profile::parse("[thresholds]\nmove_tol = 40.0\n").is_err());
        assert!(Profile::parse("[frame.swipe]\npurity = 1.5\n").is_err());
        assert!(Profile::parse("[frame.swipe]\nangle_tolerance_deg = 90.0\n").is_err());
        assert!(Profile::parse("[frame]\nforward_keys = [\"k\"]\n").is_err());
        assert!(Profile::parse("[frame]\nforward_keys = [\"ctrl+\"]\n").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        assert!(LoadedProfile::resolve(Some("/nonexistent/gesturectl-test.toml")).is_err());
    }
}
