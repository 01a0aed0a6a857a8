#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use array_spiker::combinations::{combination_count, spike_in_combinations};
use array_spiker::design::{DesignSource, NoDesign, OverrideDesign};
use array_spiker::fixtures::{FeTemplate, generate_slide};
use array_spiker::lims::{LimsDesign, LimsSnapshot, SnapshotLims, SubarrayPosition, fe_filename};
use array_spiker::panel::{DEFAULT_FE_FILENAME_TEMPLATE, SpikeInConfig, SpikeInPanel};
use array_spiker::pipeline::{RunOptions, run, write_logs};
use array_spiker::report::{create_output_directory, date_stamp, today};

/// Exit status of a run that completed but did not pass QC.
const QC_FAILED_EXIT_CODE: i32 = 2;

/// Default location of the panel configuration.
const DEFAULT_CONFIG: &str = "config.yaml";

/// File name of the LIMS snapshot written next to generated test files.
const GENERATED_LIMS_SNAPSHOT: &str = "lims_snapshot.toml";

/// File name of the panel configuration written next to generated test files.
const GENERATED_CONFIG: &str = "spike_in_config.toml";

#[derive(Parser)]
#[command(
    name = "array-spiker",
    about = "Spike-in probe QC for Agilent array Feature Extraction files",
    long_about = "Detects spiked-in control probes in Agilent Feature Extraction files and \
                 reconciles the detected combination of each sample against its expected design."
)]
struct Cli {
    /// Log per-file and per-sample detail
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
pub struct DetectArgs {
    /// One or more Feature Extraction files from the same run
    #[arg(short = 'f', long = "file", value_name = "FE_FILE", num_args = 1.., required = true)]
    pub files: Vec<PathBuf>,

    /// Directory in which the date-stamped output directory is created
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Expected design as a comma-delimited ProbeName,gSpike,rSpike file, used instead of the LIMS
    #[arg(short = 's', long = "spike-in-info", value_name = "CSV", conflicts_with = "lims_snapshot")]
    pub spike_in_info: Option<PathBuf>,

    /// LIMS export (TOML) holding the expected trios; verdicts are written back into it
    #[arg(long, value_name = "TOML")]
    pub lims_snapshot: Option<PathBuf>,

    /// Spike-in panel configuration (.toml, .yaml or .yml)
    #[arg(long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Threads used to read FE files; 0 uses every core
    #[arg(long, default_value = "1")]
    pub threads: usize,
}

#[derive(Args)]
pub struct GenerateArgs {
    /// Directory to write the generated files to
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Array (slide) identifier used in the generated file names
    #[arg(long, value_name = "ID")]
    pub array_id: String,

    /// Spike-in panel configuration (.toml, .yaml or .yml)
    #[arg(long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Real FE file to down-sample into the template; a synthetic template is used otherwise
    #[arg(long, value_name = "FE_FILE")]
    pub template: Option<PathBuf>,

    /// Write only clean subarrays, without the failed-replicate and failed-probe cases
    #[arg(long)]
    pub no_failures: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect spike-in probes and reconcile them against the expected design
    #[command(about = "Detect and reconcile spike-ins (outputs: spikeInLog files)")]
    Detect(DetectArgs),

    /// Count or list the probe combinations a sample can be spiked with
    #[command(about = "Count or list spike-in probe combinations")]
    Combinations {
        /// Spike-in panel configuration (.toml, .yaml or .yml)
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Probes per combination; defaults to the configured trio size
        #[arg(short = 'n', long)]
        size: Option<usize>,

        /// Print every combination
        #[arg(long)]
        list: bool,
    },

    /// Print the FE file name of a LIMS record
    #[command(about = "Build an FE file name from an array id and LIMS subarray")]
    Filename {
        #[arg(long, value_name = "ID")]
        dna_id: String,

        /// Sequential subarray position as numbered by the LIMS (1-8)
        #[arg(long, value_name = "1-8")]
        subarray: u32,

        /// Configuration supplying a non-default file name template
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Generate a slide of test FE files with a known design
    #[command(
        about = "Generate test FE files (outputs: 8 FE files, design CSV, LIMS snapshot, panel config)"
    )]
    Generate(GenerateArgs),

    /// Display version and build information
    #[command(about = "Display version and build information")]
    Version,
}

fn main() {
    let Cli { verbose, command } = Cli::parse();
    init_logging(verbose);

    let result = match command {
        Some(Commands::Detect(args)) => run_detect(args),
        Some(Commands::Combinations { config, size, list }) => run_combinations(config, size, list),
        Some(Commands::Filename {
            dna_id,
            subarray,
            config,
        }) => run_filename(dna_id, subarray, config),
        Some(Commands::Generate(args)) => run_generate(args),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn run_detect(args: DetectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let panel = SpikeInPanel::load(&args.config)?;
    log::info!(
        "Loaded {} spike-in probes from {}",
        panel.len(),
        args.config.display()
    );

    let mut design: Box<dyn DesignSource> = match (&args.spike_in_info, &args.lims_snapshot) {
        (Some(path), _) => Box::new(OverrideDesign::load(path)?),
        (None, Some(path)) => Box::new(LimsDesign::new(SnapshotLims::load(path)?, &panel)?),
        (None, None) => {
            log::warn!("No override file or LIMS snapshot given; no sample can be reconciled.");
            Box::new(NoDesign)
        }
    };

    let parallel = args.threads != 1;
    if parallel && args.threads > 1 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()?;
    }

    let date = today();
    let output_directory = create_output_directory(&args.output_dir, date)?;
    let report = run(&args.files, &panel, design.as_mut(), RunOptions { parallel })?;
    let logs = write_logs(&report, &output_directory, date)?;

    println!("Output saved in: {}", output_directory.display());
    println!("  Verbose log:        {}", logs.verbose.display());
    println!("  Summary log:        {}", logs.summary.display());
    println!("  Reconciliation log: {}", logs.reconciliation.display());
    println!();
    for outcome in &report.outcomes {
        println!("{}", outcome.describe());
    }
    for warning in report.summary.warnings() {
        println!("Warning: {warning}");
    }
    println!();

    if report.qc_passed() {
        println!("QC PASSED: all {} sample channel(s) match their design.", report.outcomes.len());
        Ok(())
    } else {
        println!(
            "QC FAILED: {} of {} sample channel(s) need attention.",
            report.failures().count(),
            report.outcomes.len()
        );
        process::exit(QC_FAILED_EXIT_CODE);
    }
}

fn run_combinations(
    config: PathBuf,
    size: Option<usize>,
    list: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let panel = SpikeInPanel::load(&config)?;
    let n = size.unwrap_or(panel.trio_size());
    if n == 0 {
        return Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "--size must be at least 1",
        )));
    }

    match combination_count(panel.len(), n) {
        Some(count) => println!(
            "{} probes give {count} unique combinations of {n}",
            panel.len()
        ),
        None => println!(
            "{} probes give more than {} unique combinations of {n}",
            panel.len(),
            u64::MAX
        ),
    }
    if list {
        for combination in spike_in_combinations(panel.probes(), n) {
            println!("{combination}");
        }
    }
    Ok(())
}

fn run_filename(
    dna_id: String,
    subarray: u32,
    config: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let template = match config {
        Some(path) => SpikeInPanel::load(&path)?.fe_filename_template().to_string(),
        None => DEFAULT_FE_FILENAME_TEMPLATE.to_string(),
    };
    let position = SubarrayPosition::new(subarray)?;
    println!("{}", fe_filename(&template, &dna_id, position));
    Ok(())
}

fn run_generate(args: GenerateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = SpikeInConfig::load(&args.config)?;
    let panel = SpikeInPanel::new(config.clone())?;
    let template = match &args.template {
        Some(path) => FeTemplate::downsample(path, &panel)?,
        None => FeTemplate::synthetic(&panel),
    };
    log::info!("Rendering each subarray from a {}-row template", template.row_count());

    let slide = generate_slide(
        &template,
        &panel,
        &args.output_dir,
        &args.array_id,
        !args.no_failures,
    )?;
    let snapshot_path = args.output_dir.join(GENERATED_LIMS_SNAPSHOT);
    SnapshotLims::create(
        &snapshot_path,
        LimsSnapshot {
            assignments: slide.assignments,
            results: Vec::new(),
        },
    )?;
    let config_path = args.output_dir.join(GENERATED_CONFIG);
    std::fs::write(&config_path, config.to_toml()?)?;

    for file in &slide.files {
        println!("{}", file.display());
    }
    println!("Design written to {}", slide.design_path.display());
    println!("LIMS snapshot written to {}", snapshot_path.display());
    println!("Panel configuration written to {}", config_path.display());
    Ok(())
}

/// Coarse age of a build, to the largest whole unit.
fn describe_age(age: chrono::TimeDelta) -> String {
    let plural = |n: i64, unit: &str| format!("{n} {unit}{} ago", if n == 1 { "" } else { "s" });
    if age.num_days() > 0 {
        plural(age.num_days(), "day")
    } else if age.num_hours() > 0 {
        plural(age.num_hours(), "hour")
    } else if age.num_minutes() > 0 {
        plural(age.num_minutes(), "minute")
    } else {
        "just now".to_string()
    }
}

fn print_version_info() {
    println!("array-spiker {}", env!("CARGO_PKG_VERSION"));

    let built = env!("ARRAY_SPIKER_BUILD_TIMESTAMP")
        .parse::<i64>()
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0));
    match built {
        Some(built) => println!(
            "Built: {} ({})",
            date_stamp(built.date_naive()),
            describe_age(chrono::Utc::now() - built)
        ),
        None => println!("Built: unknown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn age_uses_the_largest_whole_unit() {
        assert_eq!(describe_age(TimeDelta::seconds(20)), "just now");
        assert_eq!(describe_age(TimeDelta::minutes(1)), "1 minute ago");
        assert_eq!(describe_age(TimeDelta::minutes(150)), "2 hours ago");
        assert_eq!(describe_age(TimeDelta::days(9)), "9 days ago");
    }

    #[test]
    fn clock_skew_reads_as_just_now() {
        assert_eq!(describe_age(TimeDelta::minutes(-5)), "just now");
    }
}
