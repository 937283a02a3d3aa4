use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::info;

use dave_lib::dat::{repair_archive, RepairOptions};

/// Repair DXT5 color blocks and mipmap chains in DAVE .DAT archives.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The archive to repair in place.
    dat: Option<PathBuf>,

    /// Where to move the original archive. Defaults to <DAT>.BAK.
    backup: Option<PathBuf>,

    /// DEFLATE level for textures that have to be recompressed.
    #[arg(short = 'f', value_name = "LEVEL", value_parser = clap::value_parser!(u32).range(0..=9))]
    level: Option<u32>,
}

fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            eprintln!("ERROR - {e}");
            std::process::exit(1);
        }
        Err(e) => {
            // --help or --version output.
            let _ = e.print();
            return;
        }
    };

    // Drag and drop with no arguments should not look like a failure.
    let Some(dat) = cli.dat else {
        let _ = Cli::command().print_help();
        return;
    };

    if let Err(e) = run(&dat, cli.backup, cli.level) {
        eprintln!("ERROR - {e:#}");
        std::process::exit(1);
    }
}

fn run(dat: &Path, backup: Option<PathBuf>, level: Option<u32>) -> Result<()> {
    let backup = backup.unwrap_or_else(|| {
        let mut path = dat.as_os_str().to_owned();
        path.push(".BAK");
        PathBuf::from(path)
    });

    info!("Backing up original archive");
    fs::rename(dat, &backup)
        .context("unable to move file, does the backup file already exist?")?;

    let mut input = BufReader::new(fs::File::open(&backup)?);
    let mut output = BufWriter::new(fs::File::create(dat)?);

    let options = level.map(RepairOptions::with_level).unwrap_or_default();

    info!("Checking for textures that may require patching");
    repair_archive(&mut input, &mut output, &options)?;
    output.flush()?;

    info!("Finished!");
    Ok(())
}
