use crate::auth;
use crate::config::{Config, session_path};
use crate::error::TrackError;
use crate::reconcile::{self, PageRecord, RowOutcome};
use crate::scrape;
use crate::session::{self, Session};
use crate::sheets::{self, SHEET_TITLE, SheetsClient, sheet_url};
use chrono::Local;
use reqwest::blocking::Client;
use tracing::info;

/// One variant per user-triggered operation. Exactly one command runs per
/// invocation; there is no second concurrent I/O chain.
#[derive(Debug, Clone)]
pub enum Command {
    Authenticate,
    InitializeSheet,
    UpdateSheet {
        url: String,
        status: String,
        remarks: String,
        starred: bool,
    },
    CreateNewSheet,
    Logout,
    GetSheetUrl,
}

#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Authenticated { email: String },
    SheetReady { spreadsheet_id: String, created: bool },
    RowReconciled { key: String, outcome: RowOutcome },
    SheetCreated { spreadsheet_id: String },
    LoggedOut,
    SheetUrl { url: String },
}

/// Single handler for every command. The session is explicit: loaded by the
/// caller, mutated here, and persisted at each point the stored state
/// changes. No failure escapes as a panic; everything surfaces as a
/// `TrackError` for the boundary to print.
pub fn dispatch(
    config: &Config,
    client: &Client,
    session: &mut Session,
    command: Command,
) -> Result<CommandOutcome, TrackError> {
    match command {
        Command::Authenticate => authenticate(config, client, session),
        Command::InitializeSheet => initialize_sheet(config, client, session),
        Command::UpdateSheet {
            url,
            status,
            remarks,
            starred,
        } => update_sheet(config, client, session, &url, status, remarks, starred),
        Command::CreateNewSheet => create_new_sheet(config, client, session),
        Command::Logout => logout(config, session),
        Command::GetSheetUrl => get_sheet_url(session),
    }
}

fn authenticate(
    config: &Config,
    client: &Client,
    session: &mut Session,
) -> Result<CommandOutcome, TrackError> {
    let mut fresh = auth::login(config, client)?;
    // Re-authentication keeps the destination sheet; only email and token
    // are replaced.
    fresh.spreadsheet_id = session.spreadsheet_id.take();
    *session = fresh;
    session::save(&session_path(config), session)?;

    let email = session.email.clone().unwrap_or_default();
    Ok(CommandOutcome::Authenticated { email })
}

fn initialize_sheet(
    config: &Config,
    client: &Client,
    session: &mut Session,
) -> Result<CommandOutcome, TrackError> {
    let token = auth::access_token(config, client, session, false)?;
    let api = SheetsClient::new(client, token);

    let outcome = sheets::ensure_spreadsheet(&api, session.spreadsheet_id.as_deref(), SHEET_TITLE)?;
    session.spreadsheet_id = Some(outcome.spreadsheet_id.clone());
    session::save(&session_path(config), session)?;

    Ok(CommandOutcome::SheetReady {
        spreadsheet_id: outcome.spreadsheet_id,
        created: outcome.created,
    })
}

fn update_sheet(
    config: &Config,
    client: &Client,
    session: &mut Session,
    url: &str,
    status: String,
    remarks: String,
    starred: bool,
) -> Result<CommandOutcome, TrackError> {
    let token = auth::access_token(config, client, session, false)?;
    let Some(spreadsheet_id) = session.spreadsheet_id.clone() else {
        return Err(TrackError::NotFound(
            "No spreadsheet found. Run `pagetrack init` first.".to_string(),
        ));
    };

    let page = scrape::scrape_page(client, url)?;
    info!("scraped {:?} from {url}", page.title);

    let record = PageRecord {
        key: page.title,
        url: page.url,
        status,
        remarks,
        starred,
    };

    let api = SheetsClient::new(client, token);
    let outcome = match reconcile::reconcile(&api, &spreadsheet_id, &record, &page.timestamp) {
        // A token the API rejects despite looking fresh locally gets one
        // forced refresh and a single retry.
        Err(err) if is_credential_rejection(&err) => {
            info!("access token rejected, refreshing and retrying");
            let token = auth::access_token(config, client, session, true)?;
            let api = SheetsClient::new(client, token);
            reconcile::reconcile(&api, &spreadsheet_id, &record, &page.timestamp)?
        }
        other => other?,
    };
    Ok(CommandOutcome::RowReconciled {
        key: record.key,
        outcome,
    })
}

fn is_credential_rejection(err: &TrackError) -> bool {
    let msg = err.message();
    msg.contains("UNAUTHENTICATED") || msg.contains("invalid authentication credentials")
}

fn create_new_sheet(
    config: &Config,
    client: &Client,
    session: &mut Session,
) -> Result<CommandOutcome, TrackError> {
    let token = auth::access_token(config, client, session, false)?;
    let api = SheetsClient::new(client, token);

    let title = format!("{SHEET_TITLE} - {}", Local::now().format("%Y-%m-%d %H:%M"));
    let outcome = sheets::ensure_spreadsheet(&api, None, &title)?;
    session.spreadsheet_id = Some(outcome.spreadsheet_id.clone());
    session::save(&session_path(config), session)?;

    Ok(CommandOutcome::SheetCreated {
        spreadsheet_id: outcome.spreadsheet_id,
    })
}

fn logout(config: &Config, session: &mut Session) -> Result<CommandOutcome, TrackError> {
    session::clear(&session_path(config))?;
    *session = Session::default();
    Ok(CommandOutcome::LoggedOut)
}

fn get_sheet_url(session: &Session) -> Result<CommandOutcome, TrackError> {
    let Some(id) = session.spreadsheet_id.as_deref() else {
        return Err(TrackError::NotFound("No sheet found".to_string()));
    };
    Ok(CommandOutcome::SheetUrl { url: sheet_url(id) })
}
