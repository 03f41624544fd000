use super::cleaner::extract_after_label;
use anyhow::Result;
use scraper::{ElementRef, Html, Selector};

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("selector {:?}: {:?}", css, e))
}

fn element_text(el: ElementRef<'_>, separator: &str) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

// ── Indicator values ──────────────────────────────────────────────────────────

/// Text of every element matching `css`, in document order.
pub fn select_texts(html: &str, css: &str) -> Result<Vec<String>> {
    let doc = Html::parse_document(html);
    let sel = selector(css)?;
    Ok(doc.select(&sel).map(|el| element_text(el, "")).collect())
}

// ── Sector pages ──────────────────────────────────────────────────────────────

/// Value next to a label such as "Sector": the first element whose own text
/// mentions the label, read with its children, label and colon removed.
pub fn find_labelled_value(html: &str, label: &str) -> Result<Option<String>> {
    let doc = Html::parse_document(html);
    let all = selector("body *")?;

    for el in doc.select(&all) {
        let owns_label = el
            .children()
            .filter_map(|n| n.value().as_text())
            .any(|t| t.contains(label));
        if !owns_label {
            continue;
        }

        // label alone in its element: the value sits in the parent
        let scope = match extract_after_label(&element_text(el, " "), label) {
            Some(v) => return Ok(Some(v)),
            None => el.parent().and_then(ElementRef::wrap),
        };
        if let Some(parent) = scope {
            if let Some(v) = extract_after_label(&element_text(parent, " "), label) {
                return Ok(Some(v));
            }
        }
    }
    Ok(None)
}

/// Anchor texts inside `container` (e.g. `#page-container`), blanks dropped.
pub fn anchor_texts(html: &str, container: &str) -> Result<Vec<String>> {
    let doc = Html::parse_document(html);
    let sel = selector(&format!("{} a", container))?;
    Ok(doc
        .select(&sel)
        .map(|a| element_text(a, " "))
        .filter(|t| !t.is_empty())
        .collect())
}

/// Visible body text, one space between text nodes.
pub fn page_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let Ok(body) = selector("body") else { return String::new() };
    doc.select(&body)
        .next()
        .map(|b| element_text(b, " "))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TV_PAGE: &str = r#"
        <html><body>
          <div class="valueValue-l31H9iuA apply-common-tooltip">2,845.10</div>
          <div class="valueValue-l31H9iuA apply-common-tooltip">&#8722;1.25</div>
          <div class="other">ignored</div>
          <div class="valueValue-l31H9iuA"><span>61.</span><span>3</span></div>
        </body></html>"#;

    #[test]
    fn select_texts_follows_document_order() {
        let values = select_texts(TV_PAGE, "div[class*='valueValue']").unwrap();
        assert_eq!(values, vec!["2,845.10", "\u{2212}1.25", "61.3"]);
        assert!(select_texts(TV_PAGE, "div[[").is_err());
    }

    #[test]
    fn labelled_value_in_same_element() {
        let html = "<body><div><p>Market Cap 1,000</p><p>Sector : IT - Software</p></div></body>";
        assert_eq!(
            find_labelled_value(html, "Sector").unwrap().as_deref(),
            Some("IT - Software")
        );
    }

    #[test]
    fn labelled_value_in_sibling_element() {
        let html = "<body><div class=row><span>Sector</span><span>Pharmaceuticals</span></div></body>";
        assert_eq!(
            find_labelled_value(html, "Sector").unwrap().as_deref(),
            Some("Pharmaceuticals")
        );
        assert_eq!(find_labelled_value(html, "Industry").unwrap(), None);
    }

    #[test]
    fn anchors_scoped_to_container() {
        let html = r#"<body><a>Outside</a><div id="page-container">
            <a href="/a">Home</a><a href="/b"> Private Banks </a><a></a></div></body>"#;
        assert_eq!(
            anchor_texts(html, "#page-container").unwrap(),
            vec!["Home", "Private Banks"]
        );
    }

    #[test]
    fn page_text_joins_nodes() {
        let html = "<body><h1>HDFC Bank</h1><p>Industry</p><p>Banks</p></body>";
        assert_eq!(page_text(html), "HDFC Bank Industry Banks");
    }
}
