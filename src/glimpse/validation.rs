//! Pre-send gating checks.
//!
//! Rejections surface as user-visible messages and never mutate the store
//! or start a stream.

use thiserror::Error;

use crate::glimpse::models::SessionSettings;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Add a Gemini API key before sending.")]
    MissingApiKey,

    #[error("Add at least one YouTube URL for this mode.")]
    NoVideoUrls,

    #[error("This model accepts at most {limit} YouTube URLs per message (got {count}).")]
    TooManyVideoUrls { limit: usize, count: usize },
}

/// Per-model ceiling on video URLs carried with one message
pub fn attachment_limit(model: &str) -> usize {
    if model.contains("2.5") { 10 } else { 1 }
}

/// Parse the raw URL text box: trimmed, whitespace-split, empties dropped
pub fn parse_video_urls(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Gate a send attempt. Returns the parsed attachment URLs to carry on the
/// user message (empty unless video mode is on).
pub fn precheck(
    credential: &str,
    settings: &SessionSettings,
) -> Result<Vec<String>, ValidationError> {
    if credential.trim().is_empty() {
        return Err(ValidationError::MissingApiKey);
    }

    if !settings.video_mode {
        return Ok(Vec::new());
    }

    let urls = parse_video_urls(&settings.video_urls_raw);
    if urls.is_empty() {
        return Err(ValidationError::NoVideoUrls);
    }

    let limit = attachment_limit(&settings.model);
    if urls.len() > limit {
        return Err(ValidationError::TooManyVideoUrls {
            limit,
            count: urls.len(),
        });
    }

    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_settings(model: &str, urls: &str) -> SessionSettings {
        SessionSettings {
            model: model.to_string(),
            video_mode: true,
            video_urls_raw: urls.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_credential_rejected() {
        let settings = SessionSettings::default();
        assert_eq!(precheck("", &settings), Err(ValidationError::MissingApiKey));
        assert_eq!(
            precheck("   ", &settings),
            Err(ValidationError::MissingApiKey)
        );
        assert_eq!(
            ValidationError::MissingApiKey.to_string(),
            "Add a Gemini API key before sending."
        );
    }

    #[test]
    fn test_video_mode_requires_urls() {
        let settings = video_settings("gemini-2.5-flash", "  \n ");
        assert_eq!(precheck("key", &settings), Err(ValidationError::NoVideoUrls));
    }

    #[test]
    fn test_url_parsing_drops_empty_entries() {
        assert_eq!(
            parse_video_urls("  https://a.example \n https://b.example  "),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(parse_video_urls("").is_empty());
    }

    #[test]
    fn test_limit_is_ten_for_2_5_models() {
        let ten = vec!["https://youtu.be/x"; 10].join(" ");
        let eleven = vec!["https://youtu.be/x"; 11].join(" ");

        let settings = video_settings("gemini-2.5-pro", &ten);
        assert_eq!(precheck("key", &settings).unwrap().len(), 10);

        let settings = video_settings("gemini-2.5-pro", &eleven);
        assert_eq!(
            precheck("key", &settings),
            Err(ValidationError::TooManyVideoUrls {
                limit: 10,
                count: 11
            })
        );
    }

    #[test]
    fn test_limit_is_one_for_other_models() {
        let settings = video_settings("gemini-1.5-flash", "https://youtu.be/x");
        assert_eq!(precheck("key", &settings).unwrap().len(), 1);

        let settings = video_settings("gemini-1.5-flash", "https://youtu.be/x https://youtu.be/y");
        assert_eq!(
            precheck("key", &settings),
            Err(ValidationError::TooManyVideoUrls { limit: 1, count: 2 })
        );
    }

    #[test]
    fn test_video_mode_off_ignores_url_box() {
        let mut settings = video_settings("gemini-1.5-flash", "https://a https://b");
        settings.video_mode = false;
        assert_eq!(precheck("key", &settings), Ok(Vec::new()));
    }
}
