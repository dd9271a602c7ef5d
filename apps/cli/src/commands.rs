//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use knitwork_calc::CalcEngine;
use knitwork_core::{
    Engine, KnitOutput, KnitRequest, Knitter, LogKind, Mode, ProgressReporter, SvgDevice,
    output_path_for,
};
use knitwork_dialects::Dialect;
use knitwork_shared::{AppConfig, KnitConfig, KnitError, init_config, load_config, load_config_from};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Knitwork: literate documents in, reports and scripts out.
#[derive(Parser)]
#[command(
    name = "knitwork",
    version,
    about = "Weave documents with embedded code chunks into reports, or tangle the code out.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of the per-user one.
    #[arg(long, global = true, env = "KNITWORK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Evaluate every chunk and write the finished document.
    Knit {
        /// Input document (.md, .Rnw, .R, ...).
        input: PathBuf,

        /// Output path; `-` prints to stdout. Derived from the input by default.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Chunk syntax: markdown, noweb, or script. Detected by default.
        #[arg(long, value_parser = parse_dialect)]
        dialect: Option<Dialect>,

        /// Write a line concordance next to the output.
        #[arg(long)]
        concordance: bool,
    },

    /// Extract the code of every chunk into a script.
    Tangle {
        /// Input document.
        input: PathBuf,

        /// Output path; `-` prints to stdout. Derived from the input by default.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Chunk syntax: markdown, noweb, or script. Detected by default.
        #[arg(long, value_parser = parse_dialect)]
        dialect: Option<Dialect>,

        /// Documentation level: 0 bare markers, 1 chunk headers, 2 prose as comments.
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=2))]
        documentation: Option<u8>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

fn parse_dialect(s: &str) -> std::result::Result<Dialect, String> {
    s.parse().map_err(|e: KnitError| e.to_string())
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "knitwork=info",
        1 => "knitwork=debug",
        _ => "knitwork=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Knit {
            input,
            output,
            dialect,
            concordance,
        } => cmd_knit(config_path, &input, output.as_deref(), dialect, concordance),
        Command::Tangle {
            input,
            output,
            dialect,
            documentation,
        } => cmd_tangle(config_path, &input, output.as_deref(), dialect, documentation),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn app_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Where a run writes: a file, or stdout when `-o -` is given.
enum Target {
    File(PathBuf),
    Stdout,
}

impl Target {
    fn resolve(
        input: &Path,
        output: Option<&Path>,
        mode: Mode,
        dialect: Dialect,
        engine: &dyn Engine,
    ) -> Self {
        match output {
            Some(path) if path == Path::new("-") => Self::Stdout,
            Some(path) => Self::File(path.to_path_buf()),
            None => Self::File(output_path_for(
                input,
                mode,
                dialect,
                engine.script_extension(),
            )),
        }
    }

    /// Directory figures are written under; links in the output are relative to it.
    fn figure_root(&self, input: &Path) -> PathBuf {
        let anchor = match self {
            Self::File(path) => path.as_path(),
            Self::Stdout => input,
        };
        match anchor.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn request(&self, input: &Path, dialect: Dialect) -> KnitRequest {
        let request = KnitRequest::path(input).with_dialect(dialect);
        match self {
            Self::File(path) => request.to_file(path),
            Self::Stdout => request,
        }
    }
}

fn detect_dialect(input: &Path, requested: Option<Dialect>) -> Result<Dialect> {
    if let Some(dialect) = requested {
        return Ok(dialect);
    }
    let text = std::fs::read_to_string(input)
        .wrap_err_with(|| format!("cannot read '{}'", input.display()))?;
    Ok(Dialect::detect(Some(input), &text)?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_knit(
    config_path: Option<&Path>,
    input: &Path,
    output: Option<&Path>,
    dialect: Option<Dialect>,
    concordance: bool,
) -> Result<()> {
    let app = app_config(config_path)?;
    let mut config = KnitConfig::from(&app);
    config.concordance |= concordance;

    let dialect = detect_dialect(input, dialect)?;
    let mut engine = CalcEngine::new();
    let target = Target::resolve(input, output, Mode::Weave, dialect, &engine);
    let mut device = SvgDevice::new(target.figure_root(input));
    let request = target.request(input, dialect);

    info!(input = %input.display(), %dialect, "knitting document");

    let write_concordance = config.concordance;
    let mut knitter = Knitter::new(config);
    let out = {
        let reporter = CliProgress::new();
        knitter.knit(&mut engine, &mut device, &request, &reporter)
    };
    let out = match out {
        Ok(out) => out,
        Err(err) => return Err(report_failure(err, &target)),
    };

    for value in knitter.take_metadata() {
        info!(metadata = %value, "document metadata");
    }

    match &target {
        Target::Stdout => print!("{}", out.text),
        Target::File(path) => {
            if write_concordance {
                let side = concordance_path(path);
                std::fs::write(&side, out.concordance.to_json()?)
                    .wrap_err_with(|| format!("cannot write '{}'", side.display()))?;
                info!(path = %side.display(), "concordance written");
            }
            print_summary("Document knitted", path, &out, knitter.cache().hits());
        }
    }
    Ok(())
}

fn cmd_tangle(
    config_path: Option<&Path>,
    input: &Path,
    output: Option<&Path>,
    dialect: Option<Dialect>,
    documentation: Option<u8>,
) -> Result<()> {
    let app = app_config(config_path)?;
    let config = KnitConfig::from(&app);
    let documentation = documentation.unwrap_or(config.documentation);

    let dialect = detect_dialect(input, dialect)?;
    let mut engine = CalcEngine::new();
    let mode = Mode::Tangle { documentation };
    let target = Target::resolve(input, output, mode, dialect, &engine);
    let mut device = SvgDevice::new(target.figure_root(input));
    let request = target.request(input, dialect).tangle(documentation);

    info!(input = %input.display(), %dialect, documentation, "tangling document");

    let mut knitter = Knitter::new(config);
    let out = {
        let reporter = CliProgress::new();
        knitter.knit(&mut engine, &mut device, &request, &reporter)?
    };

    match &target {
        Target::Stdout => print!("{}", out.text),
        Target::File(path) => print_summary("Script tangled", path, &out, 0),
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = app_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn report_failure(err: KnitError, target: &Target) -> color_eyre::Report {
    if let KnitError::Evaluation { .. } = &err {
        if let Target::File(path) = target {
            warn!(path = %path.display(), "partial output written");
        }
    }
    color_eyre::Report::new(err)
}

fn concordance_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".concordance.json");
    output.with_file_name(name)
}

fn print_summary(title: &str, path: &Path, out: &KnitOutput, cache_hits: usize) {
    println!();
    println!("  {title}!");
    println!("  Output:   {}", path.display());
    println!("  Chunks:   {}", out.chunks);
    println!("  Figures:  {}", out.figures.len());
    println!("  Warnings: {}", out.log.count(LogKind::Warning));
    if cache_hits > 0 {
        println!("  Cached:   {cache_hits}");
    }
    println!("  Time:     {:.1}s", out.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn chunk(&self, label: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Chunk [{current}/{total}] {label}"));
    }

    fn done(&self, _output: &KnitOutput) {
        self.spinner.finish_and_clear();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn knit_arguments_parse() {
        let cli = Cli::parse_from([
            "knitwork",
            "knit",
            "report.Rnw",
            "-o",
            "-",
            "--dialect",
            "noweb",
            "--concordance",
        ]);
        let Command::Knit {
            input,
            output,
            dialect,
            concordance,
        } = cli.command
        else {
            panic!("expected the knit command");
        };
        assert_eq!(input, PathBuf::from("report.Rnw"));
        assert_eq!(output, Some(PathBuf::from("-")));
        assert_eq!(dialect, Some(Dialect::Noweb));
        assert!(concordance);
    }

    #[test]
    fn documentation_level_is_bounded() {
        assert!(Cli::try_parse_from(["knitwork", "tangle", "a.md", "-d", "3"]).is_err());
    }

    #[test]
    fn concordance_sits_next_to_the_output() {
        assert_eq!(
            concordance_path(Path::new("out/report.md")),
            PathBuf::from("out/report.md.concordance.json")
        );
    }

    #[test]
    fn stdout_target_anchors_figures_at_the_input() {
        let target = Target::Stdout;
        assert_eq!(
            target.figure_root(Path::new("docs/a.md")),
            PathBuf::from("docs")
        );
        assert_eq!(target.figure_root(Path::new("a.md")), PathBuf::from("."));
    }
}
