mod diff;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tablediff")]
#[command(author = "Helge Sverre <helge.sverre@gmail.com>")]
#[command(version)]
#[command(about = "Cross-database table diffing: checksum bisection and outer-join diffing")]
#[command(arg_required_else_help = true)]
#[command(max_term_width = 100)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Diff two tables, on the same or different databases
    Diff(DiffArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum AlgorithmArg {
    Auto,
    Joindiff,
    Hashdiff,
}

const FILTERING: &str = "Filtering";
const MODE: &str = "Mode";
const BEHAVIOR: &str = "Behavior";
const LIMITS: &str = "Limits";
const OUTPUT: &str = "Output";

#[derive(clap::Args)]
pub struct DiffArgs {
    /// `DB1 TABLE1 DB2 TABLE2` (cross-db) or `DB TABLE1 TABLE2` (intra-db)
    #[arg(num_args = 3..=4)]
    pub targets: Vec<String>,

    /// Key column(s); repeatable for composite keys
    #[arg(short = 'k', long = "key-columns", help_heading = FILTERING)]
    pub key_columns: Vec<String>,

    /// Update-timestamp column, enables --min-age/--max-age
    #[arg(short = 't', long = "update-column", help_heading = FILTERING)]
    pub update_column: Option<String>,

    /// Extra column(s) to compare; SQL LIKE patterns, repeatable
    #[arg(short = 'c', long = "columns", help_heading = FILTERING)]
    pub columns: Vec<String>,

    /// Stop after this many diff records
    #[arg(short = 'l', long, help_heading = LIMITS)]
    pub limit: Option<u64>,

    /// Extra WHERE predicate applied verbatim to both sides
    #[arg(short = 'w', long = "where", help_heading = FILTERING)]
    pub where_clause: Option<String>,

    /// Worker threads per database (default 1, or the active run's value)
    #[arg(short = 'j', long, help_heading = BEHAVIOR)]
    pub threads: Option<usize>,

    /// Force an algorithm instead of auto-selecting
    #[arg(short = 'a', long, value_enum, help_heading = MODE)]
    pub algorithm: Option<AlgorithmArg>,

    /// Row count below which a segment is downloaded instead of split further (default 16384)
    #[arg(long, help_heading = BEHAVIOR)]
    pub bisection_threshold: Option<u64>,

    /// Number of children per segmentation step (default 32)
    #[arg(long, help_heading = BEHAVIOR)]
    pub bisection_factor: Option<u32>,

    /// Exclude rows updated more recently than this, e.g. `5min`, `2h`, `1d`
    #[arg(long, help_heading = FILTERING)]
    pub min_age: Option<String>,

    /// Exclude rows older than this
    #[arg(long, help_heading = FILTERING)]
    pub max_age: Option<String>,

    /// Print aggregate statistics instead of (or alongside) diff records
    #[arg(short = 's', long, help_heading = OUTPUT)]
    pub stats: bool,

    /// Emit newline-delimited JSON instead of tab-separated text
    #[arg(long, help_heading = OUTPUT)]
    pub json: bool,

    /// Materialise the diff into a new table; `%t` expands to a UTC timestamp
    #[arg(short = 'm', long, help_heading = BEHAVIOR)]
    pub materialize: Option<String>,

    /// With --materialize, widen the WHERE clause to include every row
    #[arg(long, help_heading = BEHAVIOR)]
    pub materialize_all_rows: bool,

    /// Skip the COUNT(*) = COUNT(DISTINCT key) uniqueness check
    #[arg(long, help_heading = BEHAVIOR)]
    pub assume_unique_key: bool,

    /// Sample exclusive-side rows for --stats instead of full enumeration
    #[arg(long, help_heading = OUTPUT)]
    pub sample_exclusive_rows: bool,

    /// Cap rows inserted per worker thread when materialising
    #[arg(long, help_heading = LIMITS)]
    pub table_write_limit: Option<u64>,

    /// Load database/run definitions from a TOML config file
    #[arg(long = "conf", value_name = "FILE")]
    pub conf: Option<PathBuf>,

    /// Use a named `[run.<name>]` section from --conf
    #[arg(long = "run", value_name = "NAME")]
    pub run: Option<String>,

    #[arg(short = 'd', long)]
    pub debug: bool,

    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Show a progress indicator during bisection
    #[arg(short = 'i', long)]
    pub interactive: bool,
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Diff(args) => diff::run(args),
    }
}
