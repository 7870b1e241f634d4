mod cli;
mod config;
mod document;
mod frame;
mod gestures;
mod input;
mod interop;
mod logging;
mod swipe;
mod tracker;
mod transport;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
