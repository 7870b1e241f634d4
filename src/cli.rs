use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};
use notify::{RecursiveMode, Watcher};
use pico_args::Arguments;
use serde::Deserialize;
use std::{
    cell::Cell,
    env, fs,
    io::{self, BufRead, BufReader},
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use crate::config::{self, LoadedProfile, Profile};
use crate::document::EventBus;
use crate::frame::{self, FrameHost, FrameInput, KeyInput};
use crate::gestures::GestureDetector;
use crate::input::{GrabRequest, InputEvent, TouchSource};
use crate::interop::{GrabCapture, NoCapture, SharedDrag};
use crate::transport::{GestureSink, JsonLines};

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let profile: Option<String> = pargs.opt_value_from_str("--profile")?;
    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("feed") => {
            let frame_id: Option<String> = pargs.opt_value_from_str("--frame")?;
            let file: Option<String> = pargs.opt_free_from_str()?;
            let loaded = LoadedProfile::resolve(profile.as_deref())?;
            let reader: Box<dyn BufRead> = match &file {
                Some(p) if p != "-" => Box::new(BufReader::new(
                    fs::File::open(p).with_context(|| format!("failed to open {p}"))?,
                )),
                _ => Box::new(io::stdin().lock()),
            };
            match frame_id {
                Some(id) => feed_frame(&loaded.profile, &id, reader),
                None => feed_host(&loaded.profile, reader),
            }
        }

        Some("watch") => {
            let width: f32 = pargs.opt_value_from_str("--width")?.unwrap_or(1920.0);
            let height: f32 = pargs.opt_value_from_str("--height")?.unwrap_or(1080.0);
            watch(profile.as_deref(), width, height)
        }

        Some("script") => {
            let id: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: gesturectl script <instance-id>"))?;
            let loaded = LoadedProfile::resolve(profile.as_deref())?;
            println!("{}", frame::generate_script(&id, &loaded.profile.frame)?);
            Ok(())
        }

        Some("check") => {
            let loaded = LoadedProfile::resolve(profile.as_deref())?;
            let p = &loaded.profile;
            print_response(&serde_json::json!({
                "ok": true,
                "data": {
                    "profile": p.display_name(),
                    "source": loaded.source,
                    "thresholds": p.thresholds,
                    "frame": p.frame,
                }
            }));
            Ok(())
        }

        Some("doctor") => {
            print_response(&serde_json::json!({"ok": true, "data": config::doctor_report()}));
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

/// One line of `feed` input.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedRecord {
    Pointer(InputEvent),
    Drag { drag: bool, at_ms: u64 },
    Tick { tick_ms: u64 },
    Key { key: KeyInput },
}

fn records(reader: Box<dyn BufRead>) -> impl Iterator<Item = Result<FeedRecord>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(n, line)| match line {
            Err(e) => Some(Err(e.into())),
            Ok(l) if l.trim().is_empty() || l.trim_start().starts_with('#') => None,
            Ok(l) => Some(
                serde_json::from_str::<FeedRecord>(&l)
                    .map_err(|e| anyhow!("line {}: {e}", n + 1)),
            ),
        })
}

fn feed_host(profile: &Profile, reader: Box<dyn BufRead>) -> Result<()> {
    let drag = SharedDrag::new();
    let mut det = GestureDetector::new(
        profile.thresholds.clone(),
        EventBus::new(),
        drag.clone(),
        NoCapture,
    );
    let mut sink = JsonLines::new(io::stdout().lock());

    for rec in records(reader) {
        // timers due before this record fire first
        let now = match rec? {
            FeedRecord::Pointer(ev) => {
                if let Some(g) = det.tick(ev.timestamp_ms) {
                    sink.deliver(&g);
                }
                let out = det.handle(&ev);
                if let Some(g) = out.gesture() {
                    sink.deliver(g);
                }
                None
            }
            FeedRecord::Drag { drag: on, at_ms } => {
                if let Some(g) = det.tick(at_ms) {
                    sink.deliver(&g);
                }
                drag.set(on, at_ms);
                None
            }
            FeedRecord::Tick { tick_ms } => Some(tick_ms),
            FeedRecord::Key { .. } => {
                debug!("key records only apply with --frame");
                None
            }
        };
        if let Some(g) = now.and_then(|t| det.tick(t)) {
            sink.deliver(&g);
        }
        for s in det.document_mut().drain_synthetic() {
            debug!("synthetic {} for pointer {}", s.kind.as_str(), s.pointer_id);
        }
    }
    det.destroy();
    Ok(())
}

fn feed_frame(profile: &Profile, instance_id: &str, reader: Box<dyn BufRead>) -> Result<()> {
    let script = frame::generate_script(instance_id, &profile.frame)?;
    let (tx, rx) = mpsc::channel::<String>();
    let handle = frame::spawn(&script, tx)?;
    for rec in records(reader) {
        match rec? {
            FeedRecord::Pointer(ev) => handle.send(FrameInput::Pointer(ev)),
            FeedRecord::Key { key } => handle.send(FrameInput::Key(key)),
            FeedRecord::Drag { .. } | FeedRecord::Tick { .. } => {}
        }
    }
    handle.shutdown();

    let host = FrameHost::new(instance_id);
    let mut out = JsonLines::new(io::stdout().lock());
    for raw in rx.try_iter() {
        if let Some(msg) = host.accept(&raw) {
            out.write(&msg);
        }
    }
    Ok(())
}

fn watch(profile_arg: Option<&str>, width: f32, height: f32) -> Result<()> {
    let mut loaded = LoadedProfile::resolve(profile_arg)?;
    let grab: GrabRequest = Rc::new(Cell::new(None));
    let mut source = TouchSource::open(width, height, grab.clone());
    if source.is_empty() {
        return Err(anyhow!(
            "no multitouch devices detected; see `gesturectl doctor`"
        ));
    }
    let mut det = GestureDetector::new(
        loaded.profile.thresholds.clone(),
        EventBus::new(),
        SharedDrag::new(),
        GrabCapture::new(grab),
    );

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;

    let (ftx, frx) = mpsc::channel::<notify::Result<notify::Event>>();
    let _watcher = match &loaded.source {
        Some(p) => {
            let mut w = notify::recommended_watcher(ftx)?;
            w.watch(p, RecursiveMode::NonRecursive)?;
            info!("watching {} for changes", p.display());
            Some(w)
        }
        None => None,
    };

    let mut sink = JsonLines::new(io::stdout());
    info!("recognizing on profile '{}'", loaded.profile.display_name());
    while !term.load(Ordering::Relaxed) {
        let events = source.poll();
        for ev in &events {
            if let Some(g) = det.handle(ev).gesture() {
                sink.deliver(g);
            }
        }
        if let Some(g) = det.tick(source.now_ms()) {
            sink.deliver(&g);
        }
        det.document_mut().drain_synthetic();

        let changed = frx
            .try_iter()
            .any(|r| r.is_ok_and(|e| e.kind.is_modify() || e.kind.is_create()));
        if changed {
            match loaded.reload() {
                Ok(()) => {
                    det.set_thresholds(loaded.profile.thresholds.clone());
                    info!("profile reloaded");
                }
                Err(e) => warn!("reload failed, keeping last good profile: {e}"),
            }
        }

        if events.is_empty() {
            thread::sleep(Duration::from_millis(4));
        }
    }
    det.destroy();
    info!("shutting down");
    Ok(())
}

fn print_help() {
    println!(
        r#"gesturectl: pointer gesture recognizer

USAGE:
  gesturectl help [command]                    Show general or command-specific help
  gesturectl feed [--frame ID] [FILE]          Classify JSON-lines input (stdin if no FILE)
  gesturectl watch [--width W] [--height H]    Recognize gestures on a touchscreen
  gesturectl script <instance-id>              Print an embedded-frame script
  gesturectl check                             Validate a profile, print thresholds
  gesturectl doctor                            Diagnose permissions/devices

OPTIONS:
  --profile <name|path.toml>                   Profile to use (default: 'default')

TIPS:
  - Profiles: ~/.config/gesturectl/profiles
  - RUST_LOG=debug shows per-session resolutions
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "feed" => println!(
            "usage: gesturectl feed [--profile P] [--frame ID] [FILE]\n\
             Each line is one JSON record:\n  \
             {{\"kind\":\"pointerdown\",\"pointer_id\":1,\"x\":0,\"y\":0,\"timestamp_ms\":0,\"device\":\"touch\"}}\n  \
             {{\"drag\":true,\"at_ms\":120}}\n  \
             {{\"tick_ms\":600}}\n  \
             {{\"key\":{{\"key\":\"k\",\"ctrlKey\":true}}}}\n\
             Without --frame, emitted gestures are printed; with it, the messages the host accepts for ID."
        ),
        "watch" => println!(
            "usage: gesturectl watch [--profile P] [--width W] [--height H]\n\
             Reads the first touch contact from multitouch devices. The profile file is hot-reloaded."
        ),
        "script" => println!(
            "usage: gesturectl script <instance-id> [--profile P]\nPrints the frame script with its configuration baked in."
        ),
        "check" => println!(
            "usage: gesturectl check [--profile P]\nValidates the profile and prints the effective thresholds."
        ),
        "doctor" => println!(
            "usage: gesturectl doctor\nChecks permissions and lists detected multitouch devices and profiles."
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
