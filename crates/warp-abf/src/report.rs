use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::warn;

use crate::config::{AbfConfig, PrintDetails};
use crate::histogram::Histogram;

/// Columns available to the walker trace for one processed step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepOutput {
    pub iteration: u64,
    pub values: Vec<f64>,
    pub indices: Vec<i64>,
    /// Instantaneous force sample, absent on the first processed step.
    pub sample: Option<Vec<f64>>,
    /// `Fworld / max(Nworld, min_count)` at the current bin.
    pub bias: Vec<f64>,
    pub restraint: Vec<f64>,
    /// Summed wall energy over all restrained CVs.
    pub restraint_energy: f64,
    /// Generalized force handed back to the engine, `-bias + restraint`.
    pub applied: Vec<f64>,
    pub corrections: Vec<f64>,
    pub normalizations: Vec<f64>,
    pub gradient_norms: Vec<f64>,
}

/// Writes the world histogram as a text table: bin centers, hit count and
/// mean force per CV for every interior bin.
pub fn write_world_table<W: Write>(out: &mut W, world: &Histogram, min_count: u64) -> io::Result<()> {
    let dim = world.n_cvs();
    let header: Vec<String> = (0..dim)
        .map(|i| format!("cv{i}"))
        .chain(std::iter::once("count".to_string()))
        .chain((0..dim).map(|i| format!("force{i}")))
        .collect();
    writeln!(out, "# {}", header.join(" "))?;
    writeln!(out, "# min_count {min_count}")?;
    let grid = world.counts();
    for (indices, &count) in grid.iter() {
        if !grid.is_interior(&indices) {
            continue;
        }
        let (Ok(centers), Ok(mean)) = (grid.center(&indices), world.mean_force(&indices, min_count))
        else {
            continue;
        };
        let mut line = String::new();
        for c in &centers {
            line.push_str(&format!("{c:>16.8e} "));
        }
        line.push_str(&format!("{count:>10}"));
        for f in &mean {
            line.push_str(&format!(" {f:>16.8e}"));
        }
        writeln!(out, "{line}")?;
    }
    Ok(())
}

pub fn write_world_table_to(path: &Path, world: &Histogram, min_count: u64) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_world_table(&mut out, world, min_count)?;
    out.flush()
}

fn push_columns(line: &mut String, values: &[f64]) {
    for v in values {
        line.push_str(&format!(" {v:>14.6e}"));
    }
}

/// One walker-trace line with the columns selected in `print`.
pub fn format_step(print: &PrintDetails, step: &StepOutput) -> String {
    let mut line = format!("{:>10}", step.iteration);
    if print.cvs {
        push_columns(&mut line, &step.values);
    }
    if print.coords {
        for idx in &step.indices {
            line.push_str(&format!(" {idx:>6}"));
        }
    }
    if print.orthogonalization {
        push_columns(&mut line, &step.corrections);
    }
    if print.normalization {
        push_columns(&mut line, &step.normalizations);
    }
    if print.gradient {
        push_columns(&mut line, &step.gradient_norms);
    }
    if print.genforce {
        match &step.sample {
            Some(sample) => push_columns(&mut line, sample),
            None => push_columns(&mut line, &vec![0.0; step.values.len()]),
        }
    }
    if print.restraint {
        push_columns(&mut line, &step.restraint);
        push_columns(&mut line, &[step.restraint_energy]);
    }
    if print.biases {
        push_columns(&mut line, &step.bias);
    }
    line
}

pub fn walker_trace_path(config: &AbfConfig, rank: usize) -> PathBuf {
    PathBuf::from(format!("{}_walker{rank}.dat", config.filename()))
}

/// Walker trace sink. Write failures are logged once and turn the sink off.
#[derive(Default)]
pub struct Reporter {
    print: PrintDetails,
    processed: u64,
    sink: Option<Box<dyn Write + Send>>,
}

impl Reporter {
    pub fn new(print: PrintDetails) -> Self {
        Self {
            print,
            processed: 0,
            sink: None,
        }
    }

    pub fn with_sink(print: PrintDetails, sink: Box<dyn Write + Send>) -> Self {
        Self {
            print,
            processed: 0,
            sink: Some(sink),
        }
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    pub fn open_file(&mut self, path: &Path) {
        if !self.print.enabled() || self.sink.is_some() {
            return;
        }
        match File::create(path) {
            Ok(file) => self.sink = Some(Box::new(BufWriter::new(file))),
            Err(err) => warn!("walker trace {} disabled: {err}", path.display()),
        }
    }

    pub fn record(&mut self, step: &StepOutput) {
        if !self.print.enabled() {
            return;
        }
        self.processed += 1;
        if self.processed % self.print.frequency != 0 {
            return;
        }
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let line = format_step(&self.print, step);
        if let Err(err) = writeln!(sink, "{line}") {
            warn!("walker trace write failed, disabling trace: {err}");
            self.sink = None;
        }
    }

    pub fn flush(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(err) = sink.flush() {
                warn!("walker trace flush failed: {err}");
            }
        }
    }
}
