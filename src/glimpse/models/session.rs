use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Message;

/// Title assigned to sessions before the first user message names them
pub const PLACEHOLDER_TITLE: &str = "New Session";

/// Maximum characters of user text carried into a derived session title
const TITLE_MAX_CHARS: usize = 28;

/// Per-session generation parameters.
///
/// `#[serde(default)]` on every field gives the restore rule from the
/// persistence contract: stored keys win, missing keys degrade to the
/// hardcoded defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
    /// When enabled, user messages carry YouTube URLs alongside text
    pub video_mode: bool,
    /// Raw contents of the URL text box, parsed at send time
    pub video_urls_raw: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            temperature: 1.0,
            top_p: 0.95,
            max_tokens: 4096,
            system_prompt: String::new(),
            video_mode: false,
            video_urls_raw: String::new(),
        }
    }
}

/// Partial update merged into a session's settings.
/// Absent fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    pub video_mode: Option<bool>,
    pub video_urls_raw: Option<String>,
}

impl SettingsPatch {
    /// Merge this patch into settings in place
    pub fn apply(self, settings: &mut SessionSettings) {
        if let Some(model) = self.model {
            settings.model = model;
        }
        if let Some(temperature) = self.temperature {
            settings.temperature = temperature;
        }
        if let Some(top_p) = self.top_p {
            settings.top_p = top_p;
        }
        if let Some(max_tokens) = self.max_tokens {
            settings.max_tokens = max_tokens;
        }
        if let Some(system_prompt) = self.system_prompt {
            settings.system_prompt = system_prompt;
        }
        if let Some(video_mode) = self.video_mode {
            settings.video_mode = video_mode;
        }
        if let Some(video_urls_raw) = self.video_urls_raw {
            settings.video_urls_raw = video_urls_raw;
        }
    }
}

/// One independent, titled conversation with its own message history
/// and generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
    /// Refreshed on every mutation to the session or its messages
    pub updated_at: i64,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub settings: SessionSettings,
}

impl Session {
    /// Create a fresh session from a settings template
    pub fn new(template: &SessionSettings) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            title: PLACEHOLDER_TITLE.to_string(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            settings: template.clone(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().timestamp_millis();
    }

    /// Whether the session still carries the placeholder title
    pub fn has_placeholder_title(&self) -> bool {
        self.title == PLACEHOLDER_TITLE
    }
}

/// Derive a session title from the first user message.
/// Returns `None` when the content is empty or whitespace.
pub fn derive_title(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    let truncated: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if truncated.chars().count() < trimmed.chars().count() {
        Some(format!("{}...", truncated))
    } else {
        Some(truncated)
    }
}
