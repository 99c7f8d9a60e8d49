use anyhow::Result;
use clap::Parser;
use lepus::{logging, runtime, Settings};

fn main() -> Result<()> {
    let settings = Settings::parse();
    logging::init_logging(settings.logging());
    runtime::launch(settings)
}
