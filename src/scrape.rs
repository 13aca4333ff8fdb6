use crate::error::TrackError;
use chrono::Local;
use regex::Regex;
use reqwest::blocking::Client;
use scraper::{Html, Selector};
use std::sync::OnceLock;

/// Selector strategies in priority order; the first non-empty trimmed text
/// wins. Mirrors the fixed list the sheet rows were originally built from.
const TITLE_SELECTORS: [&str; 6] = [
    "#problem-statement h3",
    "h1",
    ".question-title",
    "[data-cy='question-title']",
    ".problem-title",
    "title",
];

const MAX_TITLE_LEN: usize = 100;
const FALLBACK_TITLE: &str = "Untitled Page";

#[derive(Debug, Clone)]
pub struct PageInfo {
    pub title: String,
    pub url: String,
    /// Local wall-clock time of the scrape, used as the remark stamp.
    pub timestamp: String,
}

/// Fetches the page and extracts its record. Fetch or parse trouble is a
/// `Scrape` failure for the whole operation.
pub fn scrape_page(client: &Client, url: &str) -> Result<PageInfo, TrackError> {
    let resp = client
        .get(url)
        .send()
        .map_err(|e| TrackError::Scrape(format!("Could not fetch page: {e}")))?;
    if !resp.status().is_success() {
        return Err(TrackError::Scrape(format!(
            "Could not fetch page: HTTP {}",
            resp.status()
        )));
    }
    let html = resp
        .text()
        .map_err(|e| TrackError::Scrape(format!("Could not read page: {e}")))?;

    let document = Html::parse_document(&html);
    Ok(PageInfo {
        title: extract_title(&document),
        url: url.to_string(),
        timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    })
}

pub fn extract_title(document: &Html) -> String {
    let mut title = String::new();

    for selector in TITLE_SELECTORS {
        let Ok(parsed) = Selector::parse(selector) else {
            continue;
        };
        if let Some(element) = document.select(&parsed).next() {
            let text: String = element.text().collect();
            let text = text.trim();
            if !text.is_empty() {
                title = text.to_string();
                break;
            }
        }
    }

    if title.is_empty() {
        title = document_title(document).unwrap_or_else(|| FALLBACK_TITLE.to_string());
    }

    clean_title(&title)
}

fn document_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let element = document.select(&selector).next()?;
    let text: String = element.text().collect();
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn clean_title(raw: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let ws = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"));

    let mut title = ws.replace_all(raw, " ").trim().to_string();
    if title.is_empty() {
        return FALLBACK_TITLE.to_string();
    }
    if title.chars().count() > MAX_TITLE_LEN {
        title = title.chars().take(MAX_TITLE_LEN).collect::<String>() + "...";
    }
    title
}
