//! Representative-text extraction from raw HTML.
//!
//! Priority: paragraphs inside an `<article>` container, then all paragraphs,
//! then the flattened document text. Never fails; unparsable input yields an
//! empty string.

use scraper::{Html, Selector};

fn joined_text(doc: &Html, selector: &Selector) -> String {
    let parts: Vec<String> = doc
        .select(selector)
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .collect();
    normalize_ws(&parts.join(" "))
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn extract_article_text(html: &str) -> String {
    let doc = Html::parse_document(html);

    let article_p = Selector::parse("article p").unwrap();
    let any_p = Selector::parse("p").unwrap();

    let from_article = joined_text(&doc, &article_p);
    if !from_article.is_empty() {
        return from_article;
    }

    let from_paragraphs = joined_text(&doc, &any_p);
    if !from_paragraphs.is_empty() {
        return from_paragraphs;
    }

    normalize_ws(&doc.root_element().text().collect::<Vec<_>>().join(" "))
}
