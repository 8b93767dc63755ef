//! droidherd - workflow automation for Android emulator fleets
//!
//! This is the binary entry point. All logic lives in the engine crates.

mod cli;

#[tokio::main]
async fn main() {
    if let Err(e) = droidherd_core::logging::init() {
        eprintln!("warning: logging unavailable: {}", e);
    }

    let code = cli::run().await;
    std::process::exit(code);
}
