use std::io;

#[derive(Debug)]
pub enum TrackError {
    /// Token acquisition or refresh failed; carries the host-reported message.
    Auth(String),
    /// No destination sheet, or a stored identifier turned out stale.
    NotFound(String),
    /// Request-level failure, including non-2xx API responses.
    Network(String),
    /// The page yielded no usable record.
    Scrape(String),
    Config(String),
    Io(String),
}

impl TrackError {
    pub fn message(&self) -> String {
        match self {
            TrackError::Auth(msg)
            | TrackError::NotFound(msg)
            | TrackError::Network(msg)
            | TrackError::Scrape(msg)
            | TrackError::Config(msg)
            | TrackError::Io(msg) => msg.clone(),
        }
    }

    /// User-facing text: known API failure substrings are remapped to
    /// guidance, everything else is shown verbatim.
    pub fn friendly_message(&self) -> String {
        let msg = self.message();
        if msg.contains("invalid_grant") {
            "Authentication expired. Please sign out and sign in again.".to_string()
        } else if msg.contains("insufficient permissions") {
            "Insufficient permissions. Please check the OAuth client setup.".to_string()
        } else if msg.contains("quotaExceeded") {
            "Google API quota exceeded. Please try again later.".to_string()
        } else {
            msg
        }
    }
}

impl From<io::Error> for TrackError {
    fn from(err: io::Error) -> Self {
        TrackError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for TrackError {
    fn from(err: reqwest::Error) -> Self {
        TrackError::Network(err.to_string())
    }
}
