use anyhow::Result;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use log::info;
use std::path::{Path, PathBuf};

mod collector;

use collector::{collect, default_prefix, StagingArea};

#[derive(Parser, Debug)]
#[command(name = "grab-last-iteration")]
#[command(version)]
#[command(about = "Grab last iterations from relion Class2D for further analysis. Renames to condense directory structure.")]
struct Args {
    /// Relion project base location.
    project: PathBuf,

    /// Output location for star files (optional).
    output: Option<String>,

    /// Move files to output location connection via scp.
    #[arg(short = 's', long = "scp", visible_alias = "ssh")]
    scp: bool,

    /// Provide different prefix (default is folder name).
    #[arg(short, long)]
    prefix: Option<String>,

    /// Program used for the remote copy.
    #[arg(long, default_value = "scp")]
    remote_command: String,
}

impl Args {
    // --scp needs somewhere to copy to
    fn validate(&self) -> Result<(), clap::Error> {
        if self.scp && self.output.is_none() {
            return Err(Args::command().error(
                ErrorKind::MissingRequiredArgument,
                "argument --scp/--ssh/-s: requires output to be specified",
            ));
        }
        Ok(())
    }
}

fn run(args: &Args) -> Result<Vec<PathBuf>> {
    // an empty --prefix means the default
    let prefix = match &args.prefix {
        Some(prefix) if !prefix.is_empty() => prefix.clone(),
        _ => default_prefix(&args.project)?,
    };

    if let (true, Some(destination)) = (args.scp, &args.output) {
        let staging = StagingArea::new()?;
        let files = collect(&args.project, staging.path(), &prefix)?;

        info!("Copying in progress ...");
        staging.relay(&files, destination, &args.remote_command)?;
        info!("Done");
        return Ok(files);
    }

    let dest = args.output.as_deref().map(Path::new).unwrap_or(Path::new("."));
    collect(&args.project, dest, &prefix)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(err) = args.validate() {
        err.exit();
    }

    let files = run(&args)?;
    info!("Collected {} files", files.len());
    Ok(())
}
