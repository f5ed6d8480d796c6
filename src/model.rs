use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationFailure;

/// Best-effort metadata captured from one feed item. Never persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawExtractedRecord {
    pub title: String,
    pub url: String,
    pub image_url: String,
    pub posted_at: DateTime<Utc>,
    pub author_name: String,
    pub author_page_url: String,
    pub author_avatar_url: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub read_duration: String,
}

impl RawExtractedRecord {
    /// Checks the fields ingestion and repair cannot do without.
    pub fn validate(&self) -> Result<(), ValidationFailure> {
        if self.title.trim().is_empty() {
            return Err(ValidationFailure::EmptyTitle);
        }
        if self.author_name.trim().is_empty() {
            return Err(ValidationFailure::EmptyAuthorName {
                title: self.title.clone(),
            });
        }
        Ok(())
    }

    /// A valid record that still needs its image recovered from the source page.
    pub fn needs_image(&self) -> bool {
        self.image_url.trim().is_empty() && self.validate().is_ok()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Topic {
    SaveScrapedArticle,
    ScrapeSingleArticle,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::SaveScrapedArticle => "SAVE_SCRAPED_ARTICLES",
            Topic::ScrapeSingleArticle => "SCRAPE_SINGLE_ARTICLE",
        }
    }
}

/// Payloads carried by the event bus, one variant per topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A record ready for ingestion.
    ScrapedArticle(RawExtractedRecord),
    /// A record whose image must be recovered from its source page first.
    MissingImage(RawExtractedRecord),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::ScrapedArticle(_) => Topic::SaveScrapedArticle,
            Event::MissingImage(_) => Topic::ScrapeSingleArticle,
        }
    }

    /// Decodes the payload a consumer of `expected` is allowed to handle.
    pub fn into_record(self, expected: Topic) -> Result<RawExtractedRecord, ValidationFailure> {
        let actual = self.topic();
        match (self, expected) {
            (Event::ScrapedArticle(r), Topic::SaveScrapedArticle) => Ok(r),
            (Event::MissingImage(r), Topic::ScrapeSingleArticle) => Ok(r),
            _ => Err(ValidationFailure::TopicMismatch { expected, actual }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, author: &str) -> RawExtractedRecord {
        RawExtractedRecord {
            title: title.into(),
            url: "https://example.com/a".into(),
            image_url: "https://cdn.example.com/a.png".into(),
            posted_at: Utc::now(),
            author_name: author.into(),
            author_page_url: String::new(),
            author_avatar_url: String::new(),
            summary: String::new(),
            tag: String::new(),
            read_duration: String::new(),
        }
    }

    #[test]
    fn validate_requires_title_and_author() {
        assert_eq!(
            record("  ", "alice").validate(),
            Err(ValidationFailure::EmptyTitle)
        );
        assert!(matches!(
            record("Hello", "").validate(),
            Err(ValidationFailure::EmptyAuthorName { .. })
        ));
        assert!(record("Hello", "alice").validate().is_ok());
    }

    #[test]
    fn needs_image_only_for_valid_imageless_records() {
        let mut r = record("Hello", "alice");
        assert!(!r.needs_image());
        r.image_url = " ".into();
        assert!(r.needs_image());
        r.author_name.clear();
        assert!(!r.needs_image());
    }

    #[test]
    fn into_record_rejects_wrong_topic() {
        let ev = Event::MissingImage(record("t", "a"));
        let err = ev.into_record(Topic::SaveScrapedArticle).unwrap_err();
        assert_eq!(
            err,
            ValidationFailure::TopicMismatch {
                expected: Topic::SaveScrapedArticle,
                actual: Topic::ScrapeSingleArticle,
            }
        );

        let ev = Event::ScrapedArticle(record("t", "a"));
        assert_eq!(ev.into_record(Topic::SaveScrapedArticle).unwrap().title, "t");
    }
}
