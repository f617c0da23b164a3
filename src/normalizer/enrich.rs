use html_escape::decode_html_entities;
use scraper::{Html, Selector};

/// Decode HTML entities in feed-supplied text.
pub fn decode(s: &str) -> String {
    decode_html_entities(s).to_string()
}

/// Pick a hero image for an article.
///
/// Priority order: explicit media metadata, then Open Graph / Twitter meta
/// tags, then the first body `<img>` that doesn't look like an icon or
/// avatar.
pub fn hero_image(media_thumbnail: Option<&str>, html: Option<&str>) -> Option<String> {
    if let Some(url) = media_thumbnail {
        if !url.is_empty() {
            return Some(url.to_string());
        }
    }

    let html = html?;
    if html.is_empty() {
        return None;
    }

    let document = Html::parse_document(html);

    for selector in [
        "meta[property=\"og:image\"]",
        "meta[name=\"twitter:image\"]",
    ] {
        let selector = Selector::parse(selector).ok()?;
        if let Some(content) = document
            .select(&selector)
            .find_map(|el| el.value().attr("content"))
        {
            if !content.is_empty() {
                return Some(content.to_string());
            }
        }
    }

    let img = Selector::parse("img[src]").ok()?;
    document
        .select(&img)
        .filter_map(|el| el.value().attr("src"))
        .find(|src| !src.is_empty() && !looks_like_icon(src))
        .map(String::from)
}

fn looks_like_icon(src: &str) -> bool {
    let lower = src.to_ascii_lowercase();
    ["icon", "avatar", "logo", "emoji", "badge", "pixel", "1x1"]
        .iter()
        .any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_entities() {
        assert_eq!(decode("Fish &amp; Chips"), "Fish & Chips");
        assert_eq!(decode("a &lt;b&gt; c"), "a <b> c");
    }

    #[test]
    fn media_thumbnail_wins() {
        let html = r#"<html><head><meta property="og:image" content="https://example.com/og.png"/></head></html>"#;
        assert_eq!(
            hero_image(Some("https://example.com/thumb.jpg"), Some(html)),
            Some("https://example.com/thumb.jpg".into())
        );
    }

    #[test]
    fn og_meta_beats_body_img() {
        let html = r#"<html>
<head><meta property="og:image" content="https://example.com/og.png"/></head>
<body><img src="https://example.com/photo.jpg"/></body>
</html>"#;
        assert_eq!(
            hero_image(None, Some(html)),
            Some("https://example.com/og.png".into())
        );
    }

    #[test]
    fn twitter_meta_is_second_choice() {
        let html = r#"<head><meta name="twitter:image" content="https://example.com/tw.png"/></head>"#;
        assert_eq!(
            hero_image(None, Some(html)),
            Some("https://example.com/tw.png".into())
        );
    }

    #[test]
    fn skips_icons_and_avatars() {
        let html = r#"<body>
<img src="https://example.com/favicon-icon.png"/>
<img src="https://example.com/user-avatar.jpg"/>
<img src="https://example.com/story.jpg"/>
</body>"#;
        assert_eq!(
            hero_image(None, Some(html)),
            Some("https://example.com/story.jpg".into())
        );
    }

    #[test]
    fn no_candidates_yields_none() {
        assert_eq!(hero_image(None, Some("<p>plain text</p>")), None);
        assert_eq!(hero_image(None, None), None);
        assert_eq!(hero_image(Some(""), Some("")), None);
    }
}
