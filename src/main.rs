use booking_notifier::batch::{self, BatchRunner};
use booking_notifier::config::Settings;
use booking_notifier::context::Services;
use booking_notifier::engine::RuleEngine;
use booking_notifier::notify::{HmacSmsClient, WebhookChat};
use booking_notifier::storage::{BookingStore, MemoryStore, OverlayStore, SqliteStore};
use chrono::{DateTime, FixedOffset, Utc};
use clap::{Arg, Command};
use log::LevelFilter;
use std::path::Path;
use std::process;
use std::sync::Arc;

const DEFAULT_CONFIG_PATH: &str = "/etc/booking-notifier.yaml";

#[tokio::main]
async fn main() {
    let matches = Command::new("booking-notifier")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Rule-driven SMS and chat notifications for restaurant bookings")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Settings file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("rules")
                .long("rules")
                .value_name("FILE")
                .help("Rule document (overrides rules_path from the settings file)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("bookings")
                .long("bookings")
                .value_name("FILE")
                .help("JSON array of bookings to process")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default settings file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-rules")
                .long("test-rules")
                .help("Load and validate the rule document, then exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Log SMS and chat messages instead of sending them; stored records are read but never changed")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("now")
                .long("now")
                .value_name("RFC3339")
                .help("Evaluate as if it were this time")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging with per-condition detail")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);

    let settings = match load_config(config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    let rules_path = matches
        .get_one::<String>("rules")
        .cloned()
        .unwrap_or_else(|| settings.rules_path.clone());

    if matches.get_flag("test-rules") {
        test_rules(&settings, &rules_path);
        return;
    }

    let Some(bookings_path) = matches.get_one::<String>("bookings") else {
        eprintln!("Nothing to do: pass --bookings FILE, --test-rules or --generate-config");
        process::exit(2);
    };

    let engine = match batch::build_engine(&settings, &rules_path) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error loading rules: {e}");
            process::exit(1);
        }
    };

    let bookings = match batch::load_bookings(bookings_path) {
        Ok(bookings) => bookings,
        Err(e) => {
            eprintln!("Error loading bookings: {e}");
            process::exit(1);
        }
    };

    let now = match evaluation_time(matches.get_one::<String>("now"), &settings) {
        Ok(now) => now,
        Err(e) => {
            eprintln!("Invalid --now value: {e}");
            process::exit(1);
        }
    };

    let services = match build_services(&settings, matches.get_flag("dry-run")) {
        Ok(services) => services,
        Err(e) => {
            eprintln!("Error opening storage: {e}");
            process::exit(1);
        }
    };

    let runner = BatchRunner::new(&engine, Arc::new(settings), services);
    let report = runner.run(&bookings, now).await;

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => log::error!("Failed to serialize batch report: {e}"),
    }
    if !report.failures.is_empty() {
        process::exit(1);
    }
}

fn load_config(path: &str) -> anyhow::Result<Settings> {
    if Path::new(path).exists() {
        Settings::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Settings::default())
    }
}

fn generate_default_config(path: &str) {
    let settings = Settings::default();
    match settings.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

fn evaluation_time(
    arg: Option<&String>,
    settings: &Settings,
) -> anyhow::Result<DateTime<FixedOffset>> {
    let tz = settings.timezone()?;
    match arg {
        Some(value) => Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&tz)),
        None => Ok(Utc::now().with_timezone(&tz)),
    }
}

fn build_services(settings: &Settings, dry_run: bool) -> anyhow::Result<Services> {
    let db_path = &settings.storage.database_path;
    if dry_run {
        log::info!("Dry run: messages are logged, record changes kept in memory only");
        let backing: Arc<dyn BookingStore> = if Path::new(db_path).exists() {
            Arc::new(SqliteStore::open(db_path)?)
        } else {
            log::warn!("Booking database '{db_path}' not found, dry run starts with no records");
            Arc::new(MemoryStore::new())
        };
        return Ok(Services::dry_run(Arc::new(OverlayStore::new(backing))));
    }

    let store = SqliteStore::open(db_path)?;
    Ok(Services::new(
        Arc::new(store),
        Arc::new(HmacSmsClient::from_settings(&settings.sms)),
        Arc::new(WebhookChat::from_settings(&settings.chat)),
    ))
}

fn test_rules(settings: &Settings, rules_path: &str) {
    println!("🔍 Testing rules in {rules_path}...");
    println!();

    let mut engine = match RuleEngine::from_file(rules_path) {
        Ok(engine) => engine,
        Err(e) => {
            println!("❌ Rule validation failed:");
            println!("Error: {e}");
            process::exit(1);
        }
    };
    engine.register_builtins();

    println!("Number of rules: {}", engine.rules().len());
    for (i, rule) in engine.rules().iter().enumerate() {
        let state = if rule.enabled { "" } else { " (disabled)" };
        println!(
            "  Rule {}: {}{} [{} conditions, {} actions]",
            i + 1,
            rule.name,
            state,
            rule.conditions.len(),
            rule.actions.len()
        );
    }

    let unresolved = engine.unresolved_kinds();
    if unresolved.is_empty() {
        println!("✅ Every condition and action type is registered.");
        return;
    }

    println!();
    println!("⚠️  Unregistered types:");
    for missing in &unresolved {
        println!("  • {missing}");
    }
    if settings.engine.strict_types {
        println!("❌ engine.strict_types is on, refusing these rules");
        process::exit(1);
    }
}
