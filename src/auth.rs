use crate::config::{Config, GoogleConfig, session_path};
use crate::error::TrackError;
use crate::session::{self, Session, StoredToken};
use chrono::{Duration, Local, Utc};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration as StdDuration;
use tracing::{debug, info};

const OAUTH_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets \
                     https://www.googleapis.com/auth/drive.file \
                     https://www.googleapis.com/auth/userinfo.email";

/// A token is treated as expired slightly early so an in-flight request
/// never carries a token that lapses mid-call.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct UserInfo {
    email: String,
}

/// Returns a bearer token for API calls, refreshing the cached one when it
/// is stale. `force_refresh` evicts the cached access token first and always
/// requests a fresh one. Single attempt; no retry loop lives here.
pub fn access_token(
    config: &Config,
    client: &Client,
    session: &mut Session,
    force_refresh: bool,
) -> Result<String, TrackError> {
    let Some(stored) = session.token.clone() else {
        return Err(TrackError::Auth(
            "Not signed in. Run `pagetrack login` first.".to_string(),
        ));
    };

    if !force_refresh && token_is_fresh(&stored, Utc::now().timestamp()) {
        return Ok(stored.access_token);
    }

    if force_refresh {
        debug!("evicting cached access token");
        session.token = None;
    }

    let refreshed = refresh_access_token(&config.google, client, &stored.refresh_token)?;
    session.token = Some(refreshed.clone());
    session::save(&session_path(config), session)?;
    Ok(refreshed.access_token)
}

pub fn token_is_fresh(token: &StoredToken, now: i64) -> bool {
    token.expires_at > now + EXPIRY_MARGIN_SECS
}

fn refresh_access_token(
    google: &GoogleConfig,
    client: &Client,
    refresh_token: &str,
) -> Result<StoredToken, TrackError> {
    let resp = client
        .post(OAUTH_TOKEN_URL)
        .form(&[
            ("client_id", google.client_id.as_str()),
            ("client_secret", google.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .map_err(|e| TrackError::Auth(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        return Err(TrackError::Auth(format_oauth_error(status, &body)));
    }

    let token: TokenResponse = resp.json().map_err(|e| TrackError::Auth(e.to_string()))?;
    Ok(StoredToken {
        access_token: token.access_token,
        refresh_token: token
            .refresh_token
            .unwrap_or_else(|| refresh_token.to_string()),
        expires_at: (Utc::now() + Duration::seconds(token.expires_in as i64)).timestamp(),
    })
}

/// Interactive sign-in: loopback OAuth authorization-code flow. Binds an
/// ephemeral local port, hands the consent URL to the browser, waits for the
/// redirect, exchanges the code, and overwrites the session wholesale with
/// the new email and token.
pub fn login(config: &Config, client: &Client) -> Result<Session, TrackError> {
    if config.google.client_id.trim().is_empty() || config.google.client_secret.trim().is_empty() {
        return Err(TrackError::Config(format!(
            "Google client_id/client_secret required in {:?}",
            crate::config::config_path()
        )));
    }

    let listener = TcpListener::bind("127.0.0.1:0").map_err(|e| TrackError::Auth(e.to_string()))?;
    let addr = listener
        .local_addr()
        .map_err(|e| TrackError::Auth(e.to_string()))?;
    let redirect_uri = format!("http://{}", addr);
    let state = generate_state();

    let auth_url = Url::parse_with_params(
        OAUTH_AUTH_URL,
        [
            ("client_id", config.google.client_id.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", SCOPE),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state.as_str()),
        ],
    )
    .map_err(|e| TrackError::Auth(e.to_string()))?
    .to_string();

    if open::that(&auth_url).is_err() {
        println!("Open this URL to sign in:\n{auth_url}");
    }
    info!("waiting for Google sign-in on {addr}");

    let deadline = Local::now() + Duration::minutes(10);
    listener.set_nonblocking(true)?;
    let code = loop {
        if Local::now() >= deadline {
            return Err(TrackError::Auth("Sign-in timed out. Please retry.".to_string()));
        }
        match listener.accept() {
            Ok((mut stream, _addr)) => break handle_redirect(&mut stream, &state)?,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(StdDuration::from_millis(200));
            }
            Err(err) => return Err(TrackError::Auth(err.to_string())),
        }
    };

    let token = exchange_code(&config.google, client, &code, &redirect_uri)?;
    let email = fetch_email(client, &token.access_token)?;
    info!("signed in as {email}");

    Ok(Session {
        email: Some(email),
        token: Some(token),
        spreadsheet_id: None,
    })
}

fn handle_redirect(stream: &mut TcpStream, expected_state: &str) -> Result<String, TrackError> {
    // Accepted streams can inherit the listener's nonblocking mode.
    stream
        .set_nonblocking(false)
        .map_err(|e| TrackError::Auth(e.to_string()))?;
    stream
        .set_read_timeout(Some(StdDuration::from_secs(2)))
        .map_err(|e| TrackError::Auth(e.to_string()))?;
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf);
    let request = String::from_utf8_lossy(&buf);
    let request_line = request.lines().next().unwrap_or("");
    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
    let query = path.split_once('?').map(|(_, q)| q).unwrap_or("");
    let params = parse_query(query);

    if let Some(error) = params.get("error") {
        let desc = params
            .get("error_description")
            .map(|s| format!(" ({})", s))
            .unwrap_or_default();
        let _ = respond_with_message(stream, &format!("Authorization failed: {error}{desc}"));
        return Err(TrackError::Auth(format!("Google auth failed: {error}{desc}")));
    }

    let Some(code) = params.get("code") else {
        let _ = respond_with_message(stream, "Missing authorization code.");
        return Err(TrackError::Auth(
            "Missing authorization code from Google.".to_string(),
        ));
    };

    if params.get("state").map(String::as_str) != Some(expected_state) {
        let _ = respond_with_message(stream, "Invalid state.");
        return Err(TrackError::Auth("Invalid OAuth state. Please retry.".to_string()));
    }

    let _ = respond_with_message(stream, "Sign-in complete. You can close this window.");
    Ok(code.clone())
}

fn exchange_code(
    google: &GoogleConfig,
    client: &Client,
    code: &str,
    redirect_uri: &str,
) -> Result<StoredToken, TrackError> {
    let resp = client
        .post(OAUTH_TOKEN_URL)
        .form(&[
            ("client_id", google.client_id.as_str()),
            ("client_secret", google.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .map_err(|e| TrackError::Auth(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        return Err(TrackError::Auth(format_oauth_error(status, &body)));
    }

    let token: TokenResponse = resp.json().map_err(|e| TrackError::Auth(e.to_string()))?;
    let Some(refresh) = token.refresh_token else {
        return Err(TrackError::Auth(
            "Missing refresh token from Google. Please retry and grant offline access.".to_string(),
        ));
    };

    Ok(StoredToken {
        access_token: token.access_token,
        refresh_token: refresh,
        expires_at: (Utc::now() + Duration::seconds(token.expires_in as i64)).timestamp(),
    })
}

fn fetch_email(client: &Client, access_token: &str) -> Result<String, TrackError> {
    let resp = client
        .get(USERINFO_URL)
        .bearer_auth(access_token)
        .send()
        .map_err(|e| TrackError::Auth(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(TrackError::Auth(format!(
            "Failed to get user info: HTTP {}",
            resp.status()
        )));
    }

    let info: UserInfo = resp.json().map_err(|e| TrackError::Auth(e.to_string()))?;
    Ok(info.email)
}

fn respond_with_message(stream: &mut TcpStream, message: &str) -> io::Result<()> {
    let body = format!("{message}\n");
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())
}

fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(decode_component(key), decode_component(value));
    }
    params
}

fn decode_component(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::new();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Some(hex) = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|s| u8::from_str_radix(s, 16).ok())
                {
                    out.push(hex as char);
                    i += 3;
                } else {
                    out.push('%');
                    i += 1;
                }
            }
            _ => {
                out.push(bytes[i] as char);
                i += 1;
            }
        }
    }
    out
}

fn generate_state() -> String {
    use rand::{Rng, distributions::Alphanumeric};
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn format_oauth_error(status: reqwest::StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("HTTP {}", status);
    }

    let summary = if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(trimmed) {
        if let Some(desc) = err.error_description {
            format!("{} ({})", desc, err.error)
        } else {
            err.error
        }
    } else {
        truncate_error(trimmed)
    };
    format!("HTTP {}: {}", status, summary)
}

fn truncate_error(message: &str) -> String {
    let mut out = message.replace(['\n', '\r'], " ");
    if out.len() > 240 {
        out.truncate(240);
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_fails_without_touching_the_network() {
        let config = Config::default();
        let client = Client::new();
        let mut session = Session::default();
        let err = access_token(&config, &client, &mut session, false).expect_err("must fail");
        assert!(matches!(err, TrackError::Auth(_)));
    }

    #[test]
    fn token_freshness_honors_the_expiry_margin() {
        let token = StoredToken {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_at: 1_000,
        };
        assert!(token_is_fresh(&token, 900));
        // Inside the 60s margin counts as stale.
        assert!(!token_is_fresh(&token, 941));
        assert!(!token_is_fresh(&token, 2_000));
    }

    #[test]
    fn parse_query_decodes_components() {
        let params = parse_query("code=4%2Fabc&state=xyz&scope=a+b");
        assert_eq!(params.get("code").map(String::as_str), Some("4/abc"));
        assert_eq!(params.get("state").map(String::as_str), Some("xyz"));
        assert_eq!(params.get("scope").map(String::as_str), Some("a b"));
    }

    #[test]
    fn format_oauth_error_prefers_structured_description() {
        let body = r#"{"error":"invalid_grant","error_description":"Bad token"}"#;
        let msg = format_oauth_error(reqwest::StatusCode::BAD_REQUEST, body);
        assert_eq!(msg, "HTTP 400 Bad Request: Bad token (invalid_grant)");
    }

    #[test]
    fn format_oauth_error_falls_back_to_raw_body() {
        let msg = format_oauth_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert_eq!(msg, "HTTP 500 Internal Server Error: boom");
    }
}
