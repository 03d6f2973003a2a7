//! PAC disassembler CLI
//!
//! Command-line tool for scanning PSP PAC script files against an
//! instruction definition file.

use anyhow::{bail, Context};
use clap::{Parser as ClapParser, ValueEnum};
use pac_scanner::formatter::{EntityFormatter, JsonFormatter, ListingFormatter, SummaryFormatter};
use pac_scanner::{FlowGraph, FlowOptions, PacFile, Parser, ParserOptions, Templates};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// PSP PAC script disassembler.
///
/// Splits PAC files into instructions, tables, padding and raw data using
/// a definition file of instruction templates.
#[derive(ClapParser, Debug)]
#[command(name = "pac-disasm")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file(s) to scan
    files: Vec<PathBuf>,

    /// Instruction definition file
    #[arg(short, long, env = "PAC_DEFINITIONS")]
    definitions: PathBuf,

    /// Output format
    #[arg(short, long, default_value = "listing")]
    format: OutputFormat,

    /// Candidate policy for marker bytes
    #[arg(short, long, default_value = "permissive")]
    policy: Policy,

    /// Signature of the indexed-jump opcode, in hex
    #[arg(long, env = "PAC_INDEXED_JUMP", value_parser = parse_hex)]
    indexed_jump: Option<u32>,

    /// Do not capture jump tables after indexed jumps
    #[arg(long)]
    no_jump_tables: bool,

    /// Terminator signatures for the flow summary, in hex
    #[arg(long, value_parser = parse_hex, value_delimiter = ',')]
    terminators: Vec<u32>,

    /// Call signatures for the flow summary, in hex
    #[arg(long, value_parser = parse_hex, value_delimiter = ',')]
    calls: Vec<u32>,

    /// Print a control-flow summary after each file
    #[arg(long)]
    flow: bool,

    /// Scan every *.pac file in a directory
    #[cfg(feature = "batch")]
    #[arg(long)]
    directory: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Disassembly listing
    Listing,
    /// JSON entity model
    Json,
    /// Single-line counts
    Summary,
}

/// Candidate policy options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Policy {
    /// Every marker is a candidate
    Permissive,
    /// Markers followed by a plausible class byte
    Conservative,
    /// Known signatures only
    KnownOnly,
}

fn parse_hex(value: &str) -> Result<u32, String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex signature `{}`: {}", value, e))
}

impl Args {
    fn parser_options(&self) -> ParserOptions {
        let mut options = match self.policy {
            Policy::Permissive => ParserOptions::new(),
            Policy::Conservative => ParserOptions::conservative(),
            Policy::KnownOnly => ParserOptions::known_only(),
        };
        options.indexed_jump_signature = self.indexed_jump;
        options.capture_jump_tables = !self.no_jump_tables;
        options
    }

    fn flow_options(&self) -> FlowOptions {
        FlowOptions {
            terminators: self.terminators.iter().copied().collect(),
            calls: self.calls.iter().copied().collect(),
        }
    }

    fn formatter(&self) -> Box<dyn EntityFormatter> {
        match self.format {
            OutputFormat::Listing if self.verbose => Box::new(ListingFormatter::verbose()),
            OutputFormat::Listing => Box::new(ListingFormatter::new()),
            OutputFormat::Json => Box::new(JsonFormatter::new()),
            OutputFormat::Summary => Box::new(SummaryFormatter::new()),
        }
    }

    #[cfg(feature = "batch")]
    fn inputs(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = self.files.clone();
        if let Some(dir) = &self.directory {
            let found = pac_scanner::batch::collect_pac_files(dir, false)
                .with_context(|| format!("Failed to list {}", dir.display()))?;
            files.extend(found);
        }
        Ok(files)
    }

    #[cfg(not(feature = "batch"))]
    fn inputs(&self) -> anyhow::Result<Vec<PathBuf>> {
        Ok(self.files.clone())
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging if verbose
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("pac_scanner=debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    }

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<bool> {
    let templates = Templates::from_path(&args.definitions).with_context(|| {
        format!(
            "Failed to load definitions from {}",
            args.definitions.display()
        )
    })?;
    if templates.is_empty() {
        bail!("{} contains no instruction templates", args.definitions.display());
    }

    let parser = Parser::new(&templates, args.parser_options());
    let formatter = args.formatter();
    let flow = args.flow_options();

    let inputs = args.inputs()?;
    if inputs.is_empty() {
        bail!("No input files given");
    }

    let mut success = true;
    for (path, result) in parse_inputs(&inputs, &parser) {
        match result {
            Ok(file) => print_file(&path, &file, formatter.as_ref(), args, &flow),
            Err(e) => {
                eprintln!("Error scanning {}: {:#}", path.display(), e);
                success = false;
            }
        }
    }
    Ok(success)
}

/// Parse inputs on the rayon pool; results keep the input order.
#[cfg(feature = "batch")]
fn parse_inputs(
    paths: &[PathBuf],
    parser: &Parser<'_>,
) -> Vec<(PathBuf, anyhow::Result<PacFile>)> {
    pac_scanner::batch::parse_paths(paths, parser)
        .into_iter()
        .map(|entry| (entry.path, entry.result.map_err(Into::into)))
        .collect()
}

#[cfg(not(feature = "batch"))]
fn parse_inputs(
    paths: &[PathBuf],
    parser: &Parser<'_>,
) -> Vec<(PathBuf, anyhow::Result<PacFile>)> {
    paths
        .iter()
        .map(|path| {
            let result = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))
                .and_then(|data| Ok(parser.parse(&data)?));
            (path.clone(), result)
        })
        .collect()
}

fn print_file(
    path: &Path,
    file: &PacFile,
    formatter: &dyn EntityFormatter,
    args: &Args,
    flow: &FlowOptions,
) {
    print!("{}", formatter.format_file(file, path));

    if args.flow {
        let graph = FlowGraph::build(file, flow);
        println!(
            "; flow: {} blocks, {} edges, {} sources, {} unresolved",
            graph.blocks().len(),
            graph.edges().len(),
            graph.sources().count(),
            graph.unresolved().len()
        );
        for jump in graph.unresolved() {
            println!(";   unresolved jump to {:08X}", jump.target);
        }
    }
}
