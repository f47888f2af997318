use serde_json::{json, Value};

/// Accent color for webhook embeds.
const EMBED_COLOR: u32 = 1_677_215;

/// A single notifiable item extracted from a feed.
///
/// Immutable once parsed, except [`image`](Entry::image): the preview
/// enricher may fill it in before delivery when the parser found none.
/// `url` is the sole deduplication key — two entries with the same URL
/// are the same entry as far as delivery bookkeeping is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub title: String,
    /// Canonical link to the entry. Unique identity for dedup.
    pub url: String,
    pub description: String,
    /// Publish date as display text (`Mon, 2 Jan 2006 15:04:05`).
    pub published: String,
    pub author: String,
    /// Preview image URL, if the feed or the enricher provided one.
    pub image: Option<String>,
}

impl Entry {
    /// Render the outbound webhook payload for this entry.
    ///
    /// One message per entry: the sender label is the subscription name,
    /// the embed carries title, author, canonical link, description,
    /// preview image and the publish date as footer text.
    pub fn webhook_payload(&self, sender: &str) -> Value {
        json!({
            "username": sender,
            "content": "",
            "embeds": [{
                "title": format!(":newspaper: {}", self.title),
                "author": { "name": self.author },
                "color": EMBED_COLOR,
                "url": self.url,
                "description": self.description,
                "image": { "url": self.image.as_deref().unwrap_or("") },
                "footer": { "text": self.published },
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> Entry {
        Entry {
            title: "Patch Notes 1.2".to_string(),
            url: "https://example.com/news/patch-1-2".to_string(),
            description: "Bug fixes and balance changes.".to_string(),
            published: "Mon, 2 Jan 2006 15:04:05".to_string(),
            author: "The Team".to_string(),
            image: Some("https://example.com/banner.png".to_string()),
        }
    }

    #[test]
    fn test_payload_shape() {
        let payload = sample_entry().webhook_payload("albion");

        assert_eq!(payload["username"], "albion");
        assert_eq!(payload["content"], "");

        let embed = &payload["embeds"][0];
        assert_eq!(embed["title"], ":newspaper: Patch Notes 1.2");
        assert_eq!(embed["author"]["name"], "The Team");
        assert_eq!(embed["url"], "https://example.com/news/patch-1-2");
        assert_eq!(embed["image"]["url"], "https://example.com/banner.png");
        assert_eq!(embed["footer"]["text"], "Mon, 2 Jan 2006 15:04:05");
        assert_eq!(embed["color"], 1_677_215);
    }

    #[test]
    fn test_payload_missing_image_is_empty_string() {
        let mut entry = sample_entry();
        entry.image = None;
        let payload = entry.webhook_payload("albion");
        assert_eq!(payload["embeds"][0]["image"]["url"], "");
    }
}
