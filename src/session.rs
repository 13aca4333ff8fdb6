use crate::error::TrackError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// The single persisted session: user email, cached OAuth token, and the
/// active destination spreadsheet. Always written and erased wholesale —
/// there is no partial schema migration.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Session {
    pub email: Option<String>,
    pub token: Option<StoredToken>,
    pub spreadsheet_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

pub fn load(path: &Path) -> Result<Session, TrackError> {
    if !path.exists() {
        return Ok(Session::default());
    }
    let content = fs::read_to_string(path)?;
    let session: Session =
        serde_json::from_str(&content).map_err(|e| TrackError::Io(e.to_string()))?;
    Ok(session)
}

pub fn save(path: &Path, session: &Session) -> Result<(), TrackError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content =
        serde_json::to_string_pretty(session).map_err(|e| TrackError::Io(e.to_string()))?;
    fs::write(path, content)?;
    Ok(())
}

pub fn clear(path: &Path) -> Result<(), TrackError> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_session_path() -> PathBuf {
        let mut dir = std::env::temp_dir();
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        dir.push(format!("pagetrack-test-{}-{}", std::process::id(), stamp));
        dir.join("session.json")
    }

    #[test]
    fn load_of_missing_file_yields_empty_session() {
        let path = temp_session_path();
        let session = load(&path).expect("load");
        assert!(session.email.is_none());
        assert!(session.token.is_none());
        assert!(session.spreadsheet_id.is_none());
    }

    #[test]
    fn save_and_load_round_trip() {
        let path = temp_session_path();
        let session = Session {
            email: Some("user@example.com".to_string()),
            token: Some(StoredToken {
                access_token: "at".to_string(),
                refresh_token: "rt".to_string(),
                expires_at: 12345,
            }),
            spreadsheet_id: Some("sheet-1".to_string()),
        };
        save(&path, &session).expect("save");

        let loaded = load(&path).expect("load");
        assert_eq!(loaded.email.as_deref(), Some("user@example.com"));
        assert_eq!(loaded.spreadsheet_id.as_deref(), Some("sheet-1"));
        assert_eq!(loaded.token.map(|t| t.expires_at), Some(12345));
    }

    #[test]
    fn clear_erases_the_session_wholesale() {
        let path = temp_session_path();
        let session = Session {
            email: Some("user@example.com".to_string()),
            ..Session::default()
        };
        save(&path, &session).expect("save");
        clear(&path).expect("clear");

        let loaded = load(&path).expect("load after clear");
        assert!(loaded.email.is_none());
        assert!(loaded.token.is_none());
        assert!(loaded.spreadsheet_id.is_none());
    }
}
