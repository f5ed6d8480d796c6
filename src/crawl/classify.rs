use crate::config::Site;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    Loaded,
    Placeholder,
    /// Neither a known stand-in nor a final source; does not hold an item back.
    Unknown,
}

/// Decides whether a media element's current source is final. Site specific.
pub trait MediaClassifier: Send + Sync {
    fn classify(&self, src: &str) -> MediaState;

    /// An item is loaded when none of its media is still a placeholder.
    /// Items without media count as loaded.
    fn item_loaded(&self, sources: &[String]) -> bool {
        sources
            .iter()
            .all(|src| self.classify(src) != MediaState::Placeholder)
    }
}

/// Classifies by source prefix, e.g. `data:image/gif` stand-ins vs `http` finals.
#[derive(Debug, Clone)]
pub struct PrefixClassifier {
    placeholder: Vec<String>,
    loaded: Vec<String>,
}

impl PrefixClassifier {
    pub fn new(placeholder: Vec<String>, loaded: Vec<String>) -> Self {
        Self {
            placeholder,
            loaded,
        }
    }

    pub fn from_site(site: &Site) -> Self {
        Self::new(
            site.placeholder_prefixes.clone(),
            site.loaded_prefixes.clone(),
        )
    }
}

impl MediaClassifier for PrefixClassifier {
    fn classify(&self, src: &str) -> MediaState {
        let src = src.trim();
        // An empty source has not been assigned by the lazy loader yet.
        if src.is_empty() || self.placeholder.iter().any(|p| src.starts_with(p.as_str())) {
            MediaState::Placeholder
        } else if self.loaded.iter().any(|p| src.starts_with(p.as_str())) {
            MediaState::Loaded
        } else {
            MediaState::Unknown
        }
    }
}
