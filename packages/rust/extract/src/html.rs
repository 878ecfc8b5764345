//! HTML bill pages: `<title>` plus visible body text.

use legisync_shared::{LegisyncError, Result};
use scraper::{ElementRef, Html, Selector};

use crate::ExtractedText;

/// Elements whose text never reaches the output.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

pub(crate) fn extract_html(bytes: &[u8]) -> Result<ExtractedText> {
    let html = String::from_utf8_lossy(bytes);
    let doc = Html::parse_document(&html);

    let title_sel = Selector::parse("title").expect("valid selector");
    let body_sel = Selector::parse("body").expect("valid selector");

    let title = doc
        .select(&title_sel)
        .next()
        .map(|el| collapse(&el.text().collect::<Vec<_>>().join(" ")))
        .unwrap_or_default();

    let root = doc
        .select(&body_sel)
        .next()
        .unwrap_or_else(|| doc.root_element());
    let text = visible_text(root);

    if text.is_empty() && title.is_empty() {
        return Err(LegisyncError::parsing("HTML document has no text"));
    }

    Ok(ExtractedText {
        title,
        official_title: String::new(),
        sections: if text.is_empty() { Vec::new() } else { vec![text.clone()] },
        raw_text: text,
        ..Default::default()
    })
}

/// Body text with script/style content dropped and whitespace collapsed.
fn visible_text(root: ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|el| SKIPPED_TAGS.contains(&el.name()))
        });
        if !hidden {
            parts.push(text);
        }
    }
    collapse(&parts.join(" "))
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
