//! slotctl: slotwise CLI
//!
//! Query recurring-session availability from the command line.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use slotwise::config::Config;
use slotwise::{AvailabilityService, ResolvedSlot, SlotwiseError, parse_date};

/// Slotwise CLI
#[derive(Parser)]
#[command(name = "slotctl")]
#[command(version = slotwise::PKG_VERSION)]
#[command(about = "Recurring-session availability queries")]
struct Args {
    /// Config file (default: ~/.slotwise/config.toml, then /etc/slotwise/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Studio API base URL (overrides the config file)
    #[arg(short, long, env = "SLOTWISE_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List dates an item is offered on
    Dates {
        /// Bookable item id
        item: String,
        /// First date of the window (default: today)
        #[arg(long)]
        from: Option<String>,
    },

    /// List times an item runs on a date
    Times {
        /// Bookable item id
        item: String,
        /// Date (YYYY-MM-DD)
        date: String,
    },

    /// Show remaining spots at one time
    Spots {
        /// Bookable item id
        item: String,
        /// Date (YYYY-MM-DD)
        date: String,
        /// "HH:MM until HH:MM" or "HH:MM"
        time: String,
    },

    /// Show remaining spots at every time on a date
    Grid {
        /// Bookable item id
        item: String,
        /// Date (YYYY-MM-DD)
        date: String,
    },

    /// Drop cached availability and throttle state
    ClearCache,

    /// Print version information
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.wait_hint() {
                Some(hint) => eprintln!("{hint}"),
                None => eprintln!("error: {e}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), SlotwiseError> {
    // Commands that don't need the service
    if let Command::Version = args.command {
        println!("slotctl {}", slotwise::version_string());
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;
    let mut builder = config.builder();
    if let Some(url) = args.base_url {
        builder = builder.base_url(url);
    }
    let service = builder.build()?;

    match args.command {
        Command::Dates { item, from } => {
            let dates = match from {
                Some(from) => service.available_dates_from(&item, parse_date(&from)?).await?,
                None => service.available_dates(&item).await?,
            };
            if dates.is_empty() {
                println!("no upcoming dates");
            }
            for date in dates {
                println!("{date} ({})", date.format("%A"));
            }
        }

        Command::Times { item, date } => {
            let times = service.available_times(&item, parse_date(&date)?).await?;
            if times.is_empty() {
                println!("no sessions on {date}");
            }
            for time in times {
                println!("{time}");
            }
        }

        Command::Spots { item, date, time } => {
            let slot = service
                .available_spots(&item, parse_date(&date)?, &time)
                .await?;
            print_slot(&slot);
        }

        Command::Grid { item, date } => {
            let grid = grid(&service, &item, &date).await?;
            if grid.is_empty() {
                println!("no sessions on {date}");
            }
            for slot in grid {
                print_slot(&slot);
            }
        }

        Command::ClearCache => {
            service.clear_cache();
            println!("cache cleared");
        }

        Command::Version => unreachable!("handled above"),
    }

    Ok(())
}

async fn grid(
    service: &AvailabilityService,
    item: &str,
    date: &str,
) -> Result<Vec<ResolvedSlot>, SlotwiseError> {
    let slots = service
        .available_spots_batch(item, parse_date(date)?)
        .await?;
    Ok(slots.into_values().collect())
}

fn print_slot(slot: &ResolvedSlot) {
    println!(
        "{:<20} {:>4}  {}",
        slot.display_time, slot.available, slot.message
    );
}
