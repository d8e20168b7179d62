use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Arg, ArgMatches, Command};
use common::config::Settings;
use common::logging::init_tracing;
use ingest::model::Stream;
use tracing::{error, info};

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .default_value("config/pipeline.toml")
        .help("Sets a custom config file")
}

fn stream_arg() -> Arg {
    Arg::new("stream")
        .short('s')
        .long("stream")
        .value_name("STREAM")
        .value_parser(["passes", "weather"])
        .required(true)
        .help("Enrichment API to run: passes or weather")
}

fn load(matches: &ArgMatches) -> Result<Settings> {
    let path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config/pipeline.toml");
    let settings = Settings::new(path).with_context(|| format!("loading config {}", path))?;
    init_tracing(&settings.logging);
    info!(config = %path, "Configuration loaded");
    Ok(settings)
}

fn stream(matches: &ArgMatches) -> Result<Stream> {
    let name = matches
        .get_one::<String>("stream")
        .context("--stream is required")?;
    Ok(name.parse()?)
}

async fn run(matches: ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("enqueue", sub)) => {
            let settings = load(sub)?;
            let published = ingest::run_enqueue(&settings).await?;
            println!("Published {} work items", published);
        }
        Some(("work", sub)) => {
            let settings = load(sub)?;
            let report = ingest::run_worker(&settings, stream(sub)?).await?;
            println!(
                "Received {}, stored {}, failed {}, dead-lettered {}, lost {}",
                report.received,
                report.stored(),
                report.failed.len(),
                report.dead_lettered.len(),
                report.lost.len()
            );
        }
        Some(("run", sub)) => {
            let settings = load(sub)?;
            let report = ingest::run_local(&settings, stream(sub)?).await?;
            println!("Stored {} of {} items", report.stored(), report.received);
        }
        Some(("count", sub)) => {
            let settings = load(sub)?;
            let day = match sub.get_one::<String>("date") {
                Some(date) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .with_context(|| format!("invalid --date {}", date))?,
                None => Utc::now().date_naive(),
            };
            let count = ingest::count_raw_objects(&settings, stream(sub)?, day).await?;
            println!("{}", count);
        }
        _ => anyhow::bail!("No subcommand specified. Use --help for usage information."),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let matches = Command::new("ingest-cli")
        .version("1.0")
        .about("Enqueues cities and enriches them into the raw store")
        .subcommand_required(true)
        .subcommand(
            Command::new("enqueue")
                .about("Publish every city in the source list to the work queue")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("work")
                .about("Drain the work queue through one enrichment API")
                .arg(config_arg())
                .arg(stream_arg()),
        )
        .subcommand(
            Command::new("run")
                .about("Enqueue and drain in a single process")
                .arg(config_arg())
                .arg(stream_arg()),
        )
        .subcommand(
            Command::new("count")
                .about("Count raw objects in a day's partition")
                .arg(config_arg())
                .arg(stream_arg())
                .arg(
                    Arg::new("date")
                        .short('d')
                        .long("date")
                        .value_name("YYYY-MM-DD")
                        .help("Partition day, defaults to today (UTC)"),
                ),
        )
        .get_matches();

    if let Err(e) = run(matches).await {
        error!(error = %e, "Pipeline command failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
