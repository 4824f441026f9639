use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "pmstrack", version, about = "PMS contract tracking CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Contract administration
    Contract {
        #[command(subcommand)]
        action: commands::contract::ContractAction,
    },
    /// Due dates, calendars and completions
    Pms {
        #[command(subcommand)]
        action: commands::pms::PmsAction,
    },
    /// Lifecycle sweeps
    Sweep {
        #[command(subcommand)]
        action: commands::sweep::SweepAction,
    },
    /// Upcoming maintenance views
    Upcoming {
        #[command(subcommand)]
        action: commands::upcoming::UpcomingAction,
    },
    /// User directory
    User {
        #[command(subcommand)]
        action: commands::user::UserAction,
    },
    /// Notification inbox
    Notification {
        #[command(subcommand)]
        action: commands::notification::NotificationAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pmstrack_core=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Contract { action } => commands::contract::run(action),
        Commands::Pms { action } => commands::pms::run(action),
        Commands::Sweep { action } => commands::sweep::run(action),
        Commands::Upcoming { action } => commands::upcoming::run(action),
        Commands::User { action } => commands::user::run(action),
        Commands::Notification { action } => commands::notification::run(action),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
