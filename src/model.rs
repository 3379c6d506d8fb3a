use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::error::{GlimpseError, GlimpseResult};

/// Longest caption the app accepts on a story item.
pub const MAX_CAPTION_LEN: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Author {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// One piece of ephemeral content.
///
/// `viewed_by_user` is monotonic false→true per viewer; the playback engine
/// flips it when the view-tracking side effect fires.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub kind: MediaKind,
    pub media_url: String,
    pub thumbnail_url: Option<String>,
    pub caption: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub viewed_by_user: bool,
}

/// One author's ordered story items. Item order is chronological and index
/// positions are meaningful for next/previous navigation.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct AuthorStoryGroup {
    pub author: Author,
    pub items: Vec<MediaItem>,
}

impl AuthorStoryGroup {
    pub fn validate(&self) -> GlimpseResult<()> {
        if self.items.is_empty() {
            return Err(GlimpseError::validation(format!(
                "story group for author '{}' has no items",
                self.author.id
            )));
        }

        let mut seen = BTreeSet::new();
        for item in &self.items {
            if !seen.insert(item.id.as_str()) {
                return Err(GlimpseError::validation(format!(
                    "duplicate item id '{}' in group for author '{}'",
                    item.id, self.author.id
                )));
            }
            if let Some(caption) = &item.caption {
                if caption.chars().count() > MAX_CAPTION_LEN {
                    return Err(GlimpseError::validation(format!(
                        "caption on item '{}' exceeds {MAX_CAPTION_LEN} characters",
                        item.id
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Validate a full corpus of story groups. Author order is meaningful and
/// preserved exactly as supplied.
pub fn validate_corpus(groups: &[AuthorStoryGroup]) -> GlimpseResult<()> {
    if groups.is_empty() {
        return Err(GlimpseError::validation("story corpus has no groups"));
    }
    for group in groups {
        group.validate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, kind: MediaKind) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            kind,
            media_url: format!("https://cdn.example/{id}.bin"),
            thumbnail_url: None,
            caption: None,
            created_at: Utc::now(),
            viewed_by_user: false,
        }
    }

    fn group(author_id: &str, items: Vec<MediaItem>) -> AuthorStoryGroup {
        AuthorStoryGroup {
            author: Author {
                id: author_id.to_string(),
                display_name: author_id.to_uppercase(),
                avatar_url: None,
            },
            items,
        }
    }

    #[test]
    fn json_roundtrip() {
        let g = group("ana", vec![item("a1", MediaKind::Image)]);
        let s = serde_json::to_string(&g).unwrap();
        let de: AuthorStoryGroup = serde_json::from_str(&s).unwrap();
        assert_eq!(de.author.id, "ana");
        assert_eq!(de.items.len(), 1);
        assert_eq!(de.items[0].kind, MediaKind::Image);
    }

    #[test]
    fn media_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&MediaKind::Video).unwrap(), "\"video\"");
    }

    #[test]
    fn validate_rejects_empty_group() {
        assert!(group("ana", vec![]).validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_item_ids() {
        let g = group(
            "ana",
            vec![item("a1", MediaKind::Image), item("a1", MediaKind::Video)],
        );
        assert!(g.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversized_caption() {
        let mut bad = item("a1", MediaKind::Image);
        bad.caption = Some("x".repeat(MAX_CAPTION_LEN + 1));
        assert!(group("ana", vec![bad]).validate().is_err());
    }

    #[test]
    fn validate_corpus_rejects_empty() {
        assert!(validate_corpus(&[]).is_err());
    }
}
