use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::info;

use warp_abf::config::AbfConfig;
use warp_abf::error::{AbfError, AbfResult};
use warp_abf::histogram::Histogram;
use warp_abf::report::{write_world_table, write_world_table_to};
use warp_abf::restart::RestartDocument;

#[derive(Parser)]
#[command(name = "warp-abf", version, about = "ABF histogram utility")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a JSON/YAML ABF config and print its histogram layout.
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Write the mean-force table stored in a restart file.
    Bias {
        #[arg(short, long)]
        restart: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Sum the histograms of independent runs sharing one grid.
    Merge {
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run_cli() {
        return Err(err.to_string());
    }
    Ok(())
}

fn run_cli() -> AbfResult<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Check { config } => check(&config),
        Command::Bias { restart, output } => bias(&restart, output),
        Command::Merge { input, output } => merge(&input, &output),
    }
}

fn check(path: &PathBuf) -> AbfResult<()> {
    let cfg = AbfConfig::from_path(path)?.normalized()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let layout = Histogram::new(&cfg.grid_spec())?;
    writeln!(out, "config {} is valid", path.display())?;
    writeln!(
        out,
        "dimension {}, {} stored bins (sentinels included)",
        cfg.dimension(),
        layout.n_bins()
    )?;
    for (i, cv) in cfg.cvs.iter().enumerate() {
        let restraint = match &cv.restraint {
            Some(r) => format!("restraint [{}, {}] k={}", r.min, r.max, r.spring_constant),
            None => "unrestrained".to_string(),
        };
        writeln!(
            out,
            "cv{i}: [{}, {}) {} bins{} {restraint}",
            cv.min,
            cv.max,
            cv.bins,
            if cv.periodic { " periodic" } else { "" }
        )?;
    }
    writeln!(
        out,
        "min_count {} timestep {} frequency {} sync_interval {}",
        cfg.min_count, cfg.timestep, cfg.frequency, cfg.sync_interval
    )?;
    Ok(())
}

fn bias(restart: &PathBuf, output: Option<PathBuf>) -> AbfResult<()> {
    let doc = RestartDocument::read(restart)?;
    let world = doc.histogram()?;
    match output {
        Some(path) => {
            write_world_table_to(&path, &world, doc.config.min_count)?;
            info!("wrote {} ({} hits)", path.display(), world.total_hits());
        }
        None => {
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            write_world_table(&mut out, &world, doc.config.min_count)?;
            out.flush()?;
        }
    }
    Ok(())
}

fn merge(inputs: &[PathBuf], output: &PathBuf) -> AbfResult<()> {
    let Some((first, rest)) = inputs.split_first() else {
        return Err(AbfError::Parse("merge needs at least one input".into()));
    };
    let base = RestartDocument::read(first)?;
    let mut world = base.histogram()?;
    let mut iteration = base.iteration;
    for path in rest {
        let doc = RestartDocument::read(path)?;
        if doc.config.grid_spec() != base.config.grid_spec() {
            return Err(AbfError::Mismatch(format!(
                "{} uses a different grid than {}",
                path.display(),
                first.display()
            )));
        }
        world.accumulate(&doc.histogram()?)?;
        iteration = iteration.max(doc.iteration);
    }
    RestartDocument::new(&base.config, iteration, &world).write(output)?;
    info!(
        "merged {} restart files into {} ({} hits)",
        inputs.len(),
        output.display(),
        world.total_hits()
    );
    Ok(())
}
