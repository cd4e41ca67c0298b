use std::io::Write;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

use crate::config::{Config, RunOptions};
use crate::differ::output::writer_for;
use crate::differ::{self, Algorithm, DiffOptions, DiffRequest};

use super::{AlgorithmArg, DiffArgs};

/// Targets resolved from the CLI's two positional forms.
struct Targets {
    left_uri: String,
    left_table: String,
    right_uri: String,
    right_table: String,
}

fn resolve_targets(args: &[String], config: &Config) -> anyhow::Result<Targets> {
    let resolved = match args.len() {
        3 => {
            // `DB TABLE1 TABLE2` — intra-db form, same connection both sides.
            let db = config.resolve_database_uri(&args[0]);
            Targets {
                left_uri: db.clone(),
                left_table: args[1].clone(),
                right_uri: db,
                right_table: args[2].clone(),
            }
        }
        4 => {
            // `DB1 TABLE1 DB2 TABLE2` — cross-db form.
            Targets {
                left_uri: config.resolve_database_uri(&args[0]),
                left_table: args[1].clone(),
                right_uri: config.resolve_database_uri(&args[2]),
                right_table: args[3].clone(),
            }
        }
        n => anyhow::bail!("expected 3 or 4 positional arguments (DB1 TABLE1 DB2 TABLE2 or DB TABLE1 TABLE2), got {n}"),
    };
    Ok(resolved)
}

/// `<int><unit>` where unit is one of the spec's recognised spellings.
/// Not delegated to a duration-parsing crate: `mon`/`y` aren't units any
/// off-the-shelf duration grammar recognises, so calendar-approximate
/// conversions (30-day months, 365-day years) are hand-rolled here.
fn parse_age(s: &str) -> anyhow::Result<Duration> {
    let split_at = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow::anyhow!("invalid duration {s:?}: missing unit"))?;
    let (number, unit) = s.split_at(split_at);
    let n: u64 = number
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid duration {s:?}: not a number"))?;
    let secs = match unit {
        "s" | "seconds" => n,
        "min" | "minutes" => n * 60,
        "h" | "hours" => n * 3_600,
        "d" | "days" => n * 86_400,
        "w" | "weeks" => n * 604_800,
        "mon" | "months" => n * 2_592_000,
        "y" | "years" => n * 31_536_000,
        other => anyhow::bail!("invalid duration unit {other:?} in {s:?}"),
    };
    Ok(Duration::from_secs(secs))
}

pub fn run(args: DiffArgs) -> anyhow::Result<()> {
    tracing::debug!(targets = ?args.targets, "starting diff");

    let config = match &args.conf {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let run = args.run.as_deref().map(|name| config.resolve_run(name)).transpose()?;

    let targets = if let (Some(run_name), Some(run)) = (&args.run, &run) {
        let left_db = run
            .left_database
            .clone()
            .ok_or_else(|| anyhow::anyhow!("[run.{run_name}] is missing 1.database"))?;
        let left_table = run
            .left_table
            .clone()
            .ok_or_else(|| anyhow::anyhow!("[run.{run_name}] is missing 1.table"))?;
        let right_db = run
            .right_database
            .clone()
            .ok_or_else(|| anyhow::anyhow!("[run.{run_name}] is missing 2.database"))?;
        let right_table = run
            .right_table
            .clone()
            .ok_or_else(|| anyhow::anyhow!("[run.{run_name}] is missing 2.table"))?;
        Targets {
            left_uri: config.resolve_database_uri(&left_db),
            left_table,
            right_uri: config.resolve_database_uri(&right_db),
            right_table,
        }
    } else {
        resolve_targets(&args.targets, &config)?
    };

    // CLI flags win over a `[run.<name>]` preset, which wins over hardcoded
    // defaults.
    let key_columns = if !args.key_columns.is_empty() {
        args.key_columns.clone()
    } else {
        run.as_ref().and_then(|r| r.key_columns.clone()).unwrap_or_default()
    };
    if key_columns.is_empty() {
        anyhow::bail!("-k/--key-columns is required (directly or via --run)");
    }
    let extra_columns = if !args.columns.is_empty() {
        args.columns.clone()
    } else {
        run.as_ref().and_then(|r| r.columns.clone()).unwrap_or_default()
    };
    let run_field = |f: fn(&RunOptions) -> Option<String>| run.as_ref().and_then(f);
    let update_column = RunOptions::merge_cli_override(
        run_field(|r| r.update_column.clone()),
        args.update_column.clone(),
    );
    let where_clause = RunOptions::merge_cli_override(
        run_field(|r| r.where_clause.clone()),
        args.where_clause.clone(),
    );
    let threads = RunOptions::merge_cli_override(run.as_ref().and_then(|r| r.threads), args.threads)
        .unwrap_or(1);
    let bisection_factor = RunOptions::merge_cli_override(
        run.as_ref().and_then(|r| r.bisection_factor),
        args.bisection_factor,
    )
    .unwrap_or(32);
    let bisection_threshold = RunOptions::merge_cli_override(
        run.as_ref().and_then(|r| r.bisection_threshold),
        args.bisection_threshold,
    )
    .unwrap_or(16_384);
    let limit = RunOptions::merge_cli_override(run.as_ref().and_then(|r| r.limit), args.limit);
    let algorithm_arg = args.algorithm.unwrap_or(match run.as_ref().and_then(|r| r.algorithm.as_deref()) {
        Some("joindiff") => AlgorithmArg::Joindiff,
        Some("hashdiff") => AlgorithmArg::Hashdiff,
        _ => AlgorithmArg::Auto,
    });

    let algorithm = match algorithm_arg {
        AlgorithmArg::Auto => Algorithm::Auto,
        AlgorithmArg::Joindiff => Algorithm::JoinDiff,
        AlgorithmArg::Hashdiff => Algorithm::HashDiff,
    };

    let opts = DiffOptions {
        bisection_factor,
        bisection_threshold,
        threads,
        algorithm,
        assume_unique_key: args.assume_unique_key,
        limit,
        where_clause: where_clause.clone(),
    };

    let left_db = differ::connect(&targets.left_uri, threads)?;
    let right_db = if targets.right_uri == targets.left_uri {
        left_db.clone()
    } else {
        differ::connect(&targets.right_uri, threads)?
    };

    let left = differ::connect_to_table(left_db, targets.left_table, key_columns.clone())?;
    let right = differ::connect_to_table(right_db, targets.right_table, key_columns)?;

    let request = DiffRequest {
        extra_columns,
        update_column,
        min_age: args.min_age.as_deref().map(parse_age).transpose()?,
        max_age: args.max_age.as_deref().map(parse_age).transpose()?,
    };

    let now = chrono::Utc::now();

    if let Some(name_template) = &args.materialize {
        let (left, right, algorithm) = differ::prepare(left, right, request, &opts, now)?;
        if algorithm != Algorithm::JoinDiff {
            anyhow::bail!("-m/--materialize requires JoinDiff (same-connection tables)");
        }
        let table_name = differ::join_diff::JoinDiffer::new(&opts).materialize(
            &left,
            &right,
            name_template,
            now,
            args.materialize_all_rows,
            args.table_write_limit,
        )?;
        eprintln!("materialized diff into table {table_name:?}");
        return Ok(());
    }

    if args.stats && args.sample_exclusive_rows {
        let sample_size = args.limit.unwrap_or(100);
        let (left, right, algorithm) = differ::prepare(left, right, request, &opts, now)?;
        if algorithm != Algorithm::JoinDiff {
            anyhow::bail!("--sample-exclusive-rows requires JoinDiff (same-connection tables)");
        }
        let (left_only, right_only) =
            differ::join_diff::JoinDiffer::new(&opts).sample_exclusive_rows(&left, &right, sample_size)?;
        eprintln!(
            "sampled {} left-exclusive and {} right-exclusive keys (sample size {sample_size})",
            left_only.len(),
            right_only.len()
        );
        return Ok(());
    }

    let mut result = differ::diff_tables(left, right, request, opts, now)?;

    let progress = if args.interactive {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {elapsed_precise} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    } else {
        None
    };

    let start = Instant::now();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut writer = writer_for(args.json);
    let progress_stats = result.stats().clone();

    let mut exit_error = None;
    for record in &mut result {
        match record {
            Ok(record) => {
                if !args.stats {
                    writer.write_record(&mut out, &record)?;
                }
                if let Some(pb) = &progress {
                    pb.set_message(format!("{} diffs found", progress_stats.total()));
                }
            }
            Err(e) => {
                exit_error = Some(e);
                break;
            }
        }
    }
    let summary = result.summary();
    result.close();

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    if let Some(e) = exit_error {
        return Err(anyhow::Error::from(e));
    }

    if args.stats {
        out.flush().ok();
        eprintln!("{summary}");
        eprintln!("completed in {:.3?}", start.elapsed());
    }

    Ok(())
}
