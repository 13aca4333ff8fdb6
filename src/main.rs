use clap::{Parser, Subcommand};
use reqwest::blocking::Client;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod auth;
mod commands;
mod config;
mod error;
mod reconcile;
mod scrape;
mod session;
mod sheets;

use commands::{Command, CommandOutcome, dispatch};
use config::{Config, session_path};
use error::TrackError;
use reconcile::RowOutcome;

#[derive(Parser)]
#[command(
    name = "pagetrack",
    version,
    about = "Track the pages you are working through into a Google Sheet"
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Sign in with Google and store the session
    Login,
    /// Verify the tracked spreadsheet, creating it if needed
    Init,
    /// Scrape a page title and record it in the spreadsheet
    Update {
        /// Page to scrape
        url: String,
        /// Progress column value
        #[arg(long, default_value = "Attempted")]
        status: String,
        /// Note to append to the remarks history
        #[arg(long, default_value = "")]
        remarks: String,
        /// Mark the row as starred
        #[arg(long)]
        starred: bool,
    },
    /// Create a fresh timestamped spreadsheet and switch to it
    NewSheet,
    /// Print the tracked spreadsheet's URL
    SheetUrl {
        /// Also open it in the default browser
        #[arg(long)]
        open: bool,
    },
    /// Sign out and erase the stored session
    Logout,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err.friendly_message());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), TrackError> {
    let config = Config::load();
    let mut session = session::load(&session_path(&config))?;
    let client = Client::new();

    let open_after = matches!(cli.command, CliCommand::SheetUrl { open: true });
    let command = match cli.command {
        CliCommand::Login => Command::Authenticate,
        CliCommand::Init => Command::InitializeSheet,
        CliCommand::Update {
            url,
            status,
            remarks,
            starred,
        } => Command::UpdateSheet {
            url,
            status,
            remarks,
            starred,
        },
        CliCommand::NewSheet => Command::CreateNewSheet,
        CliCommand::SheetUrl { .. } => Command::GetSheetUrl,
        CliCommand::Logout => Command::Logout,
    };

    let outcome = dispatch(&config, &client, &mut session, command)?;
    report(&outcome, open_after)
}

fn report(outcome: &CommandOutcome, open_after: bool) -> Result<(), TrackError> {
    match outcome {
        CommandOutcome::Authenticated { email } => {
            if email.is_empty() {
                println!("Signed in.");
            } else {
                println!("Signed in as {email}.");
            }
        }
        CommandOutcome::SheetReady {
            spreadsheet_id,
            created,
        } => {
            if *created {
                println!("Created spreadsheet {spreadsheet_id}.");
            } else {
                println!("Using existing spreadsheet {spreadsheet_id}.");
            }
            println!("{}", sheets::sheet_url(spreadsheet_id));
        }
        CommandOutcome::RowReconciled { key, outcome } => match outcome {
            RowOutcome::Updated(row) => println!("Updated row {row} for {key:?}."),
            RowOutcome::Appended => println!("Added a new row for {key:?}."),
        },
        CommandOutcome::SheetCreated { spreadsheet_id } => {
            println!("Created spreadsheet {spreadsheet_id}.");
            println!("{}", sheets::sheet_url(spreadsheet_id));
        }
        CommandOutcome::LoggedOut => println!("Signed out."),
        CommandOutcome::SheetUrl { url } => {
            println!("{url}");
            if open_after {
                open::that(url)
                    .map_err(|e| TrackError::Io(format!("Could not open browser: {e}")))?;
            }
        }
    }
    Ok(())
}
