//! Selfie Compose CLI Tool
//!
//! Command-line interface for cutting a person out of a photo and placing
//! them over a new background.

#[cfg(feature = "cli")]
use selfie_compose::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
