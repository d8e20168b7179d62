use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Arg, ArgMatches, Command};
use common::config::Settings;
use common::logging::init_tracing;
use ingest::model::Stream;
use tracing::error;

fn config_and_date_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .default_value("config/pipeline.toml")
                .help("Sets a custom config file"),
        )
        .arg(
            Arg::new("date")
                .short('d')
                .long("date")
                .value_name("YYYY-MM-DD")
                .help("Partition day, defaults to today (UTC)"),
        )
}

fn common_args(command: Command) -> Command {
    config_and_date_args(command).arg(
        Arg::new("stream")
            .short('s')
            .long("stream")
            .value_name("STREAM")
            .value_parser(["passes", "weather"])
            .required(true)
            .help("Raw stream to read: passes or weather"),
    )
}

struct Invocation {
    settings: Settings,
    stream: Stream,
    day: NaiveDate,
}

fn parse_settings_and_day(matches: &ArgMatches) -> Result<(Settings, NaiveDate)> {
    let path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config/pipeline.toml");
    let settings = Settings::new(path).with_context(|| format!("loading config {}", path))?;
    init_tracing(&settings.logging);

    let day = match matches.get_one::<String>("date") {
        Some(date) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .with_context(|| format!("invalid --date {}", date))?,
        None => Utc::now().date_naive(),
    };
    Ok((settings, day))
}

fn parse(matches: &ArgMatches) -> Result<Invocation> {
    let (settings, day) = parse_settings_and_day(matches)?;
    let stream: Stream = matches
        .get_one::<String>("stream")
        .context("--stream is required")?
        .parse()?;

    Ok(Invocation { settings, stream, day })
}

async fn run(matches: ArgMatches) -> Result<bool> {
    match matches.subcommand() {
        Some(("check", sub)) => {
            let Invocation { settings, stream, day } = parse(sub)?;
            let report = lakehouse::run_quality_checks(&settings, stream, day).await?;
            for check in &report.checks {
                println!("{:<14} {}  {}", check.name, check.status, check.detail);
            }
            Ok(report.passed())
        }
        Some(("compact", sub)) => {
            let Invocation { settings, stream, day } = parse(sub)?;
            let outcome = lakehouse::run_compaction(&settings, stream, day).await?;
            match outcome.key {
                Some(key) => println!("Wrote {} rows to {}", outcome.rows, key),
                None => println!("No raw records for {} on {}", stream, day),
            }
            Ok(true)
        }
        Some(("final", sub)) => {
            let (settings, day) = parse_settings_and_day(sub)?;
            let report = lakehouse::run_final_table(&settings, day).await?;
            match report.outcome.key {
                Some(key) => println!("Wrote {} joined rows to {}", report.outcome.rows, key),
                None => println!("No passes to join on {}", day),
            }
            let check = &report.duplicates;
            println!("{:<14} {}  {}", check.name, check.status, check.detail);
            Ok(check.passed())
        }
        _ => anyhow::bail!("No subcommand specified. Use --help for usage information."),
    }
}

#[tokio::main]
async fn main() {
    let matches = Command::new("lakehouse-cli")
        .version("1.0")
        .about("Checks, compacts and joins the daily raw partitions")
        .subcommand_required(true)
        .subcommand(common_args(
            Command::new("check").about("Run completeness and quality checks on a day's partition"),
        ))
        .subcommand(common_args(
            Command::new("compact").about("Rewrite a day's raw partition as one parquet file"),
        ))
        .subcommand(config_and_date_args(
            Command::new("final").about("Join a day's compacted passes and weather into the final table"),
        ))
        .get_matches();

    match run(matches).await {
        Ok(true) => {}
        // Checks ran; at least one failed.
        Ok(false) => std::process::exit(2),
        Err(e) => {
            error!(error = %e, "Lakehouse command failed");
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
