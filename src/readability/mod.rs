//! Full-text article extraction.
//!
//! Feeds routinely ship a truncated summary; this module derives a clean
//! article body from the page behind the item link. Extraction is a
//! best-effort enrichment: it runs out-of-band after ingestion, and a
//! failed or thin extraction leaves the feed-supplied content in place.

mod background;

pub use background::{spawn_background_enricher, EnricherHandle};

use scraper::{ElementRef, Html, Selector};

use crate::domain::Article;
use crate::normalizer::enrich;

/// Containers tried in priority order when locating the main article body.
const CONTENT_SELECTORS: [&str; 8] = [
    "article",
    "[role=\"main\"]",
    "main",
    ".post-content",
    ".article-content",
    ".entry-content",
    ".content",
    "#content",
];

/// Elements whose subtree never contributes article text.
const REMOVE_TAGS: [&str; 8] = [
    "nav", "header", "footer", "aside", "script", "style", "form", "noscript",
];

/// Class/id markers for boilerplate regions.
const REMOVE_MARKERS: [&str; 6] = ["sidebar", "comment", "share", "related", "advert", "promo"];

/// Text blocks harvested from the chosen container.
const BLOCK_SELECTOR: &str = "p, h1, h2, h3, h4, li, blockquote, pre, figcaption";

/// An extraction below this many text characters is treated as a miss.
const MIN_CONTENT_LEN: usize = 100;

/// Result of a successful page extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub content: String,
    pub hero_image: Option<String>,
}

/// An article is worth extracting when it links somewhere and neither the
/// feed content nor the summary is substantial.
pub fn needs_extraction(article: &Article) -> bool {
    if article.url.is_none() || article.readability_content.is_some() {
        return false;
    }
    article.display_content().len() < 200
}

/// Extract the readable body from a fetched HTML page. Returns `None` when
/// no container yields enough text.
pub fn extract(html: &str) -> Option<Extraction> {
    let document = Html::parse_document(html);
    let blocks = Selector::parse(BLOCK_SELECTOR).ok()?;

    for selector in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        let Some(container) = document.select(&selector).next() else {
            continue;
        };

        let mut text_len = 0;
        let mut parts = Vec::new();
        for block in container.select(&blocks) {
            if has_removed_ancestor(&block) {
                continue;
            }
            let text: String = block.text().collect::<Vec<_>>().join(" ");
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            text_len += trimmed.len();
            parts.push(block.html());
        }

        if text_len >= MIN_CONTENT_LEN {
            return Some(Extraction {
                content: parts.join("\n"),
                hero_image: enrich::hero_image(None, Some(html)),
            });
        }
    }

    None
}

fn has_removed_ancestor(block: &ElementRef) -> bool {
    block.ancestors().any(|node| {
        let Some(el) = ElementRef::wrap(node) else {
            return false;
        };
        let value = el.value();
        if REMOVE_TAGS.contains(&value.name()) {
            return true;
        }
        let marked = |attr: Option<&str>| {
            attr.map(|a| {
                let a = a.to_ascii_lowercase();
                REMOVE_MARKERS.iter().any(|m| a.contains(m))
            })
            .unwrap_or(false)
        };
        marked(value.attr("class")) || marked(value.attr("id"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html>
<head><meta property="og:image" content="https://example.com/hero.jpg"/></head>
<body>
  <nav><p>Home News About Contact and lots of other navigation text here</p></nav>
  <article>
    <h1>The Headline</h1>
    <p>First paragraph of the story, long enough to count toward the minimum
    content threshold that separates real articles from boilerplate.</p>
    <div class="share"><p>Share this on all your networks!</p></div>
    <p>Second paragraph with more substantive text for the extraction.</p>
  </article>
  <footer><p>Copyright forever</p></footer>
</body>
</html>"#;

    #[test]
    fn extracts_article_blocks() {
        let extraction = extract(PAGE).unwrap();
        assert!(extraction.content.contains("The Headline"));
        assert!(extraction.content.contains("First paragraph"));
        assert!(extraction.content.contains("Second paragraph"));
    }

    #[test]
    fn drops_boilerplate_regions() {
        let extraction = extract(PAGE).unwrap();
        assert!(!extraction.content.contains("Share this"));
        assert!(!extraction.content.contains("Copyright"));
        assert!(!extraction.content.contains("navigation text"));
    }

    #[test]
    fn finds_hero_image_on_page() {
        let extraction = extract(PAGE).unwrap();
        assert_eq!(
            extraction.hero_image.as_deref(),
            Some("https://example.com/hero.jpg")
        );
    }

    #[test]
    fn thin_pages_extract_nothing() {
        assert!(extract("<html><body><article><p>too short</p></article></body></html>").is_none());
        assert!(extract("<html><body><p>no container</p></body></html>").is_none());
    }

    #[test]
    fn needs_extraction_requires_link_and_thin_content() {
        let mut article = Article::new(1, "https://example.com/feed.xml", "g1");
        assert!(!needs_extraction(&article));

        article.url = Some("https://example.com/article".into());
        assert!(needs_extraction(&article));

        article.content = Some("x".repeat(250));
        assert!(!needs_extraction(&article));

        article.content = None;
        article.readability_content = Some("already extracted".into());
        assert!(!needs_extraction(&article));
    }
}
