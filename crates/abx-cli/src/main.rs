use abx_core::prelude::*;
use abx_core::{sample_size_for, FileStorage, Storage, TestReport};
use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("abx")
        .version(abx_core::VERSION)
        .about("ABX experimentation engine")
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Engine config (TOML)"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Persist tests and participants in this directory"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("plan")
                .about("Participants needed per variant to detect a lift")
                .arg(
                    Arg::new("baseline")
                        .long("baseline")
                        .required(true)
                        .value_parser(value_parser!(f64))
                        .help("Current conversion rate, as a proportion (0.10)"),
                )
                .arg(
                    Arg::new("target")
                        .long("target")
                        .required(true)
                        .value_parser(value_parser!(f64))
                        .help("Conversion rate to detect, as a proportion (0.15)"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run synthetic traffic through a two-arm test and stop it")
                .arg(
                    Arg::new("sessions")
                        .long("sessions")
                        .default_value("10000")
                        .value_parser(value_parser!(u64))
                        .help("Number of sessions to assign"),
                )
                .arg(
                    Arg::new("control-rate")
                        .long("control-rate")
                        .default_value("0.10")
                        .value_parser(value_parser!(f64))
                        .help("True conversion rate of the control"),
                )
                .arg(
                    Arg::new("variant-rate")
                        .long("variant-rate")
                        .default_value("0.12")
                        .value_parser(value_parser!(f64))
                        .help("True conversion rate of the treatment"),
                )
                .arg(
                    Arg::new("order-value")
                        .long("order-value")
                        .default_value("49.0")
                        .value_parser(value_parser!(f64))
                        .help("Revenue per conversion"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("keep-running")
                        .long("keep-running")
                        .action(ArgAction::SetTrue)
                        .help("Leave the test running instead of stopping it"),
                ),
        )
        .subcommand(
            Command::new("report")
                .about("Report on a persisted test")
                .arg(
                    Arg::new("test-id")
                        .required(true)
                        .help("Test to report on"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn engine_config(args: &ArgMatches) -> Result<EngineConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(EngineConfig::new()),
    }
}

async fn open_storage(args: &ArgMatches) -> Result<Arc<dyn Storage>> {
    Ok(match args.get_one::<PathBuf>("data-dir") {
        Some(dir) => Arc::new(
            FileStorage::open(dir)
                .await
                .with_context(|| format!("opening data directory {}", dir.display()))?,
        ),
        None => Arc::new(MemoryStorage::new()),
    })
}

fn plan(args: &ArgMatches) -> Result<()> {
    let baseline = *args.get_one::<f64>("baseline").context("missing baseline")?;
    let target = *args.get_one::<f64>("target").context("missing target")?;

    let Some(per_variant) = sample_size_for(baseline, target) else {
        bail!("cannot plan: baseline must be in (0, 1) and differ from target");
    };
    println!("Baseline: {:.2}%", baseline * 100.0);
    println!("Target:   {:.2}%", target * 100.0);
    println!("Participants per variant: {per_variant}");
    Ok(())
}

async fn simulate(args: &ArgMatches, mut config: EngineConfig, storage: Arc<dyn Storage>) -> Result<()> {
    let sessions = *args.get_one::<u64>("sessions").context("missing sessions")?;
    let control_rate = *args.get_one::<f64>("control-rate").context("missing control-rate")?;
    let variant_rate = *args.get_one::<f64>("variant-rate").context("missing variant-rate")?;
    let order_value = *args.get_one::<f64>("order-value").context("missing order-value")?;
    let seed = *args.get_one::<u64>("seed").context("missing seed")?;
    for (name, rate) in [("control-rate", control_rate), ("variant-rate", variant_rate)] {
        if !(0.0..=1.0).contains(&rate) {
            bail!("{name} must be within [0, 1], got {rate}");
        }
    }

    config.rng_seed = Some(seed);
    let engine = ExperimentEngine::new(storage, config)?;
    let experiment = ExperimentConfig::new("Simulated CTA", "cli")
        .with_hypothesis("Treatment copy lifts conversions")
        .with_variant(Variant::control("control", "Control", 50.0))
        .with_variant(Variant::new("treatment", "Treatment", 50.0))
        .with_metric(
            Metric::new("signup", "Signups", MetricType::Conversion, control_rate, variant_rate)
                .primary(),
        );

    let test = engine.create_test(experiment).await?;
    engine.start_test(&test.id).await?;

    let mut rng = StdRng::seed_from_u64(seed ^ 0x5eed);
    let mut served = 0u64;
    for _ in 0..sessions {
        let session = SessionId::from(uuid::Uuid::new_v4().to_string());
        let Some(variant) = engine.assign(&session, &test.id).await else {
            continue;
        };
        served += 1;
        let rate = if variant.is_control { control_rate } else { variant_rate };
        if rng.random_bool(rate) {
            engine
                .record_conversion(
                    &session,
                    &test.id,
                    "signup",
                    order_value,
                    serde_json::json!({ "source": "simulation" }),
                )
                .await?;
        }
    }
    tracing::info!(test_id = %test.id, sessions, served, "Simulation traffic done");

    if !args.get_flag("keep-running") {
        engine.stop_test(&test.id).await?;
    }
    let report = engine.generate_test_report(&test.id).await?;
    print_report(&report);
    Ok(())
}

async fn report(args: &ArgMatches, config: EngineConfig, storage: Arc<dyn Storage>) -> Result<()> {
    let test_id = args
        .get_one::<String>("test-id")
        .map(|id| TestId::from(id.as_str()))
        .context("missing test id")?;
    let engine = ExperimentEngine::open(storage, config).await?;
    let report = engine.generate_test_report(&test_id).await?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &TestReport) {
    let summary = &report.summary;
    println!("{} ({})", summary.name, summary.test_id);
    println!("=======================");
    println!("Status: {}", summary.status);
    println!("Duration: {} day(s)", summary.duration_days);
    println!(
        "Participants: {}  Conversions: {}  Rate: {:.2}%",
        summary.total_participants, summary.total_conversions, summary.overall_conversion_rate
    );
    println!();

    println!(
        "{:<12} {:>8} {:>8} {:>8} {:>10} {:>8}",
        "variant", "n", "conv", "rate%", "improve%", "conf%"
    );
    for row in &report.variant_performance {
        let marker = if row.is_winner { " *" } else { "" };
        println!(
            "{:<12} {:>8} {:>8} {:>8.2} {:>10.1} {:>8.1}{marker}",
            row.variant_id, row.participants, row.conversions, row.conversion_rate, row.improvement,
            row.confidence
        );
    }
    println!();

    for insight in &report.insights {
        println!("[{:?}] {}: {}", insight.kind, insight.title, insight.description);
    }
    for recommendation in &report.recommendations {
        println!("- {recommendation}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    let config = engine_config(&matches)?;

    match matches.subcommand() {
        Some(("plan", args)) => plan(args),
        Some(("simulate", args)) => {
            let storage = open_storage(&matches).await?;
            simulate(args, config, storage).await
        }
        Some(("report", args)) => {
            if matches.get_one::<PathBuf>("data-dir").is_none() {
                bail!("report needs --data-dir");
            }
            let storage = open_storage(&matches).await?;
            report(args, config, storage).await
        }
        _ => Ok(()),
    }
}
