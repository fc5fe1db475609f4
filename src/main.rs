use std::path::PathBuf;

use clap::Parser;

use orbis::app::{run, AppConfig};

/// Navigable 3D globe built from administrative boundary data.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// GeoJSON dataset to render (defaults to the bundled boundaries).
    dataset: Option<PathBuf>,

    /// Skip the mesh optimization passes.
    #[arg(long)]
    no_optimize: bool,

    /// Start with wireframe rendering on.
    #[arg(long)]
    wireframe: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    run(AppConfig {
        dataset: cli.dataset,
        optimize: !cli.no_optimize,
        wireframe: cli.wireframe,
    })
}
