//! Field extraction for one feed item.
//!
//! Every field is resolved through an ordered list of locators; the first one that yields
//! a non-empty value wins. Locators are plain functions so new markup variants can be
//! appended without touching the extractor itself.
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::config::Site;
use crate::model::RawExtractedRecord;

pub type Locator = fn(&ElementRef<'_>) -> Option<String>;

const SUMMARY_MIN_CHARS: usize = 50;
const SUMMARY_MAX_CHARS: usize = 300;

fn first<'a>(node: &ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    node.select(&selector).next()
}

fn text_at(node: &ElementRef<'_>, css: &str) -> Option<String> {
    first(node, css).map(|el| el.text().collect::<String>().trim().to_string())
}

fn attr_at(node: &ElementRef<'_>, css: &str, attr: &str) -> Option<String> {
    first(node, css)
        .and_then(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
}

/// Text nodes directly under the element, skipping nested elements.
fn own_text_at(node: &ElementRef<'_>, css: &str) -> Option<String> {
    let el = first(node, css)?;
    let text: String = el
        .children()
        .filter_map(|child| child.value().as_text().map(|t| t.to_string()))
        .collect();
    Some(text.trim().to_string())
}

pub const TITLE: &[Locator] = &[
    |n| text_at(n, ".title-wrapper h2 a"),
    |n| text_at(n, "h2 a"),
    |n| text_at(n, "h2"),
    |n| text_at(n, "h3"),
];

pub const ARTICLE_URL: &[Locator] = &[
    |n| attr_at(n, ".title-wrapper h2 a", "href"),
    |n| attr_at(n, "h2 a", "href"),
    |n| attr_at(n, "a[href]", "href"),
];

pub const IMAGE_URL: &[Locator] = &[
    |n| attr_at(n, ".image-wrapper a span img", "src"),
    |n| attr_at(n, ".image-wrapper img", "src"),
    |n| attr_at(n, "img[data-nimg]", "src"),
];

pub const AUTHOR_NAME: &[Locator] = &[
    |n| text_at(n, ".card-info .author .author-info a.author-link"),
    |n| text_at(n, "a.author-link"),
    |n| text_at(n, "[rel='author']"),
];

pub const AUTHOR_PAGE_URL: &[Locator] = &[
    |n| attr_at(n, ".card-info .author .author-info a.author-link", "href"),
    |n| attr_at(n, "a.author-link", "href"),
    |n| attr_at(n, "[rel='author']", "href"),
];

pub const AUTHOR_AVATAR_URL: &[Locator] = &[
    |n| attr_at(n, ".card-info .author span img", "src"),
    |n| attr_at(n, ".author img", "src"),
];

pub const DATE_TEXT: &[Locator] = &[
    |n| own_text_at(n, ".author-info .date"),
    |n| attr_at(n, "time[datetime]", "datetime"),
    |n| text_at(n, "time"),
];

pub const READ_DURATION: &[Locator] = &[
    |n| text_at(n, ".author-info .date div"),
    |n| text_at(n, ".read-time"),
];

pub const TAG: &[Locator] = &[
    |n| text_at(n, ".image-wrapper .tag a"),
    |n| text_at(n, ".tag a"),
];

pub const SUMMARY: &[Locator] = &[
    |n| text_at(n, ".summary"),
    |n| text_at(n, ".description"),
    |n| text_at(n, ".excerpt"),
    |n| text_at(n, ".snippet"),
];

/// First non-empty value produced by `locators`.
pub fn first_non_empty(node: &ElementRef<'_>, locators: &[Locator]) -> Option<String> {
    locators
        .iter()
        .filter_map(|locate| locate(node))
        .find(|v| !v.is_empty())
}

/// First summary candidate longer than 50 chars, capped at 300 chars plus `...`.
pub fn pick_summary(node: &ElementRef<'_>) -> String {
    SUMMARY
        .iter()
        .filter_map(|locate| locate(node))
        .find(|s| s.chars().count() > SUMMARY_MIN_CHARS)
        .map(|s| truncate_summary(&s))
        .unwrap_or_default()
}

fn truncate_summary(s: &str) -> String {
    if s.chars().count() <= SUMMARY_MAX_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(SUMMARY_MAX_CHARS).collect();
    out.push_str("...");
    out
}

/// Tries each known date layout in order. `None` when nothing matches.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    const DATE_LAYOUTS: &[&str] = &["%b %d, %Y", "%B %d, %Y"];
    for layout in DATE_LAYOUTS {
        if let Ok(d) = NaiveDate::parse_from_str(text, layout) {
            return midnight(d);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }
    const DATETIME_LAYOUTS: &[&str] = &["%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%d %H:%M:%S"];
    for layout in DATETIME_LAYOUTS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    // Day-first wins over month-first when both would parse.
    const NUMERIC_LAYOUTS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"];
    for layout in NUMERIC_LAYOUTS {
        if let Ok(d) = NaiveDate::parse_from_str(text, layout) {
            return midnight(d);
        }
    }
    None
}

fn midnight(d: NaiveDate) -> Option<DateTime<Utc>> {
    d.and_hms_opt(0, 0, 0).map(|ndt| Utc.from_utc_datetime(&ndt))
}

/// Unparseable or empty text falls back to the current time.
pub fn posted_at_or_now(text: &str) -> DateTime<Utc> {
    parse_date(text).unwrap_or_else(|| {
        debug!(text, "unparseable date; using current time");
        Utc::now()
    })
}

/// Builds records from feed markup, rewriting relative links against the site origin.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    origin: Url,
    default_avatar_url: String,
    default_tag: String,
}

impl FieldExtractor {
    pub fn new(origin: Url, default_avatar_url: impl Into<String>) -> Self {
        Self {
            origin,
            default_avatar_url: default_avatar_url.into(),
            default_tag: String::new(),
        }
    }

    pub fn from_site(site: &Site) -> anyhow::Result<Self> {
        let origin = Url::parse(&site.origin)?;
        Ok(Self::new(origin, site.default_avatar_url.clone()).with_default_tag(&site.category))
    }

    /// Tag used when the item carries none.
    pub fn with_default_tag(mut self, tag: &str) -> Self {
        self.default_tag = tag.to_string();
        self
    }

    /// Absolute http(s) URLs pass through, protocol-relative ones take the origin's scheme,
    /// root-relative paths are joined to the origin. Anything else (placeholders, `data:`
    /// URIs) is dropped.
    pub fn absolutize(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Some(raw.to_string());
        }
        if raw.starts_with("//") && raw.len() > 2 {
            return Some(format!("{}:{}", self.origin.scheme(), raw));
        }
        if raw.starts_with('/') && !raw.starts_with("//") {
            return self.origin.join(raw).ok().map(|u| u.to_string());
        }
        None
    }

    fn first_url(&self, node: &ElementRef<'_>, locators: &[Locator]) -> Option<String> {
        locators
            .iter()
            .filter_map(|locate| locate(node))
            .find_map(|raw| self.absolutize(&raw))
    }

    pub fn extract(&self, node: &ElementRef<'_>) -> RawExtractedRecord {
        let date_text = first_non_empty(node, DATE_TEXT).unwrap_or_default();
        RawExtractedRecord {
            title: first_non_empty(node, TITLE).unwrap_or_default(),
            url: self.first_url(node, ARTICLE_URL).unwrap_or_default(),
            image_url: self.first_url(node, IMAGE_URL).unwrap_or_default(),
            posted_at: posted_at_or_now(&date_text),
            author_name: first_non_empty(node, AUTHOR_NAME).unwrap_or_default(),
            author_page_url: self.first_url(node, AUTHOR_PAGE_URL).unwrap_or_default(),
            author_avatar_url: self
                .first_url(node, AUTHOR_AVATAR_URL)
                .unwrap_or_else(|| self.default_avatar_url.clone()),
            summary: pick_summary(node),
            tag: first_non_empty(node, TAG).unwrap_or_else(|| self.default_tag.clone()),
            read_duration: first_non_empty(node, READ_DURATION).unwrap_or_default(),
        }
    }

    /// Extracts items matching `item_selector` in document order, skipping untitled ones,
    /// and stops once `max` records are collected.
    pub fn extract_all(&self, html: &str, item_selector: &str, max: usize) -> Vec<RawExtractedRecord> {
        let Ok(selector) = Selector::parse(item_selector) else {
            return Vec::new();
        };
        let document = Html::parse_document(html);
        document
            .select(&selector)
            .map(|node| self.extract(&node))
            .filter(|record| !record.title.is_empty())
            .take(max)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    const CARD: &str = r#"
    <div class="infinite-scroll-component">
      <article>
        <div class="image-wrapper">
          <a href="/p1"><span><img data-nimg="1" src="/images/p1.png"></span></a>
          <div class="tag"><a href="/tagged/bitcoin">bitcoin</a></div>
        </div>
        <div class="title-wrapper"><h2><a href="/p1">  First post  </a></h2></div>
        <div class="card-info">
          <div class="author">
            <span><img src="https://cdn.example.com/alice.png"></span>
            <div class="author-info">
              <a class="author-link" href="/u/alice">alice</a>
              <div class="date">Jan 2, 2023<div>4 min read</div></div>
            </div>
          </div>
        </div>
        <p class="summary">This summary is comfortably longer than fifty characters in total.</p>
      </article>
      <article>
        <div class="title-wrapper"><h2><a href="https://other.example.com/p2">Second</a></h2></div>
        <div class="image-wrapper"><a><span><img data-nimg="1" src="data:image/gif;base64,R0lGOD"></span></a></div>
        <a class="author-link" href="/u/bob">bob</a>
      </article>
      <article><div class="image-wrapper"></div></article>
    </div>"#;

    fn extractor() -> FieldExtractor {
        FieldExtractor::new(
            Url::parse("https://hackernoon.com").unwrap(),
            "https://hackernoon.com/default-avatar.png",
        )
        .with_default_tag("bitcoin")
    }

    #[test]
    fn parses_known_layouts() {
        let d = parse_date("Jan 2, 2023").unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2023, 1, 2));
        let d = parse_date("January 15, 2024").unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2024, 1, 15));
        assert!(parse_date("2023-03-04T05:06:07Z").is_some());
        assert!(parse_date("2023-03-04 05:06:07").is_some());
        let d = parse_date("2023-03-04").unwrap();
        assert_eq!(d.day(), 4);
        let d = parse_date("25/12/2023").unwrap();
        assert_eq!((d.month(), d.day()), (12, 25));
        let d = parse_date("12/25/2023").unwrap();
        assert_eq!((d.month(), d.day()), (12, 25));
    }

    #[test]
    fn unparseable_or_empty_date_falls_back_to_now() {
        for text in ["", "   ", "yesterday-ish"] {
            let before = Utc::now();
            let got = posted_at_or_now(text);
            assert!(got >= before && got <= Utc::now());
        }
    }

    #[test]
    fn extracts_full_card() {
        let records = extractor().extract_all(CARD, ".infinite-scroll-component article", 10);
        assert_eq!(records.len(), 2);

        let r = &records[0];
        assert_eq!(r.title, "First post");
        assert_eq!(r.url, "https://hackernoon.com/p1");
        assert_eq!(r.image_url, "https://hackernoon.com/images/p1.png");
        assert_eq!(r.author_name, "alice");
        assert_eq!(r.author_page_url, "https://hackernoon.com/u/alice");
        assert_eq!(r.author_avatar_url, "https://cdn.example.com/alice.png");
        assert_eq!((r.posted_at.year(), r.posted_at.month(), r.posted_at.day()), (2023, 1, 2));
        assert_eq!(r.read_duration, "4 min read");
        assert_eq!(r.tag, "bitcoin");
        assert!(r.summary.starts_with("This summary"));
    }

    #[test]
    fn sparse_card_uses_fallbacks() {
        let records = extractor().extract_all(CARD, "article", 10);
        let r = &records[1];
        assert_eq!(r.title, "Second");
        assert_eq!(r.url, "https://other.example.com/p2");
        assert_eq!(r.image_url, "", "placeholder sources are not image URLs");
        assert_eq!(r.author_name, "bob");
        assert_eq!(r.author_avatar_url, "https://hackernoon.com/default-avatar.png");
        assert_eq!(r.tag, "bitcoin");
        assert_eq!(r.summary, "");
    }

    #[test]
    fn extract_all_respects_max() {
        let records = extractor().extract_all(CARD, "article", 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "First post");
    }

    #[test]
    fn summary_is_truncated() {
        let long = "x".repeat(400);
        let html = format!(r#"<article><div class="excerpt">{}</div></article>"#, long);
        let doc = Html::parse_fragment(&html);
        let sel = Selector::parse("article").unwrap();
        let node = doc.select(&sel).next().unwrap();
        let summary = pick_summary(&node);
        assert_eq!(summary.chars().count(), 303);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn absolutize_rules() {
        let ex = extractor();
        assert_eq!(ex.absolutize("/a/b").as_deref(), Some("https://hackernoon.com/a/b"));
        assert_eq!(ex.absolutize("http://x.y/z").as_deref(), Some("http://x.y/z"));
        assert_eq!(ex.absolutize("data:image/gif;base64,AAA"), None);
        assert_eq!(ex.absolutize("relative.png"), None);
        assert_eq!(
            ex.absolutize("//cdn.hackernoon.com/x.png").as_deref(),
            Some("https://cdn.hackernoon.com/x.png")
        );
        assert_eq!(ex.absolutize("//"), None);
    }
}
