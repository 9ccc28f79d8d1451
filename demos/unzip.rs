use std::path::PathBuf;

use anyhow::*;
use log::*;
use structopt::*;

use lazip::*;

#[derive(Debug, StructOpt)]
#[structopt(name = "unzip", about = "Dumps a .zip file into the current directory")]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Change to the given directory before perfoming any operations.
    #[structopt(short = "C", long)]
    directory: Option<PathBuf>,

    /// Prints the files in the ZIP archive instead of extracting them.
    #[structopt(short = "n", long)]
    dry_run: bool,

    /// Check each file's CRC-32 as it's extracted.
    #[structopt(long)]
    verify: bool,

    #[structopt(name("ZIP file"))]
    zip_path: PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    // Open before changing directories so relative archive paths still work.
    info!("Opening {:#?}", &args.zip_path);
    let zip_file = std::fs::File::open(&args.zip_path).context("Couldn't open zip file")?;
    let archive = ZipArchive::with_options(
        std::io::BufReader::new(zip_file),
        ArchiveOptions::default().verify_checksums(args.verify),
    );

    if let Some(chto) = args.directory {
        std::env::set_current_dir(&chto)
            .with_context(|| format!("Couldn't set working directory to {}", chto.display()))?;
    }

    if args.dry_run {
        for entry in archive.entries().context("Couldn't load archive")? {
            println!("{:>10}  {}", entry.size, entry.name);
        }
        Ok(())
    } else {
        archive
            .extract_all(".")
            .context("Couldn't extract archive")
    }
}
