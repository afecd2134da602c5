use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use reldb::app::{App, Commands};
use reldb::util;

#[derive(Debug, Parser)]
#[command(author, version, about = "A small multi-index relational datafile engine", long_about = None)]
pub struct Args {
    /// Data directory holding the catalog and table files.
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> Result<()> {
    util::init();

    let args = Args::parse();
    let mut app = App::new(args.data_dir);

    app.run(args.command)?;

    info!("time costs {:?}", app.time_costs());
    Ok(())
}
