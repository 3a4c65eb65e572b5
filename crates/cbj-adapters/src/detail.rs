//! Detail page walk: section headers and label/value blocks in document order.

use std::sync::LazyLock;

use cbj_core::text::{normalize_multiline_text, normalize_text};
use cbj_core::{DetailField, RawDetails};
use scraper::{ElementRef, Html, Selector};

use crate::sanitize::sanitize;

pub const DEFAULT_SECTION: &str = "Général";

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static ROOT: LazyLock<Selector> = LazyLock::new(|| selector("#offre-detail"));
static BLOCKS: LazyLock<Selector> = LazyLock::new(|| selector("h2.section-header, div.field"));
static SECTION_HEADER: LazyLock<Selector> = LazyLock::new(|| selector("h2.section-header"));
static FIELD_LABEL: LazyLock<Selector> = LazyLock::new(|| selector(".field-label"));
static FIELD_VALUE: LazyLock<Selector> = LazyLock::new(|| selector(".field-value"));
static DEADLINE_ELEMENT: LazyLock<Selector> = LazyLock::new(|| selector("[id*='date_limite']"));

/// What a detail page yields before logical fields are resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailDocument {
    pub fields: Vec<DetailField>,
    pub raw_details: RawDetails,
    /// Text of the dedicated deadline element, when the page has one.
    pub deadline_hint: Option<String>,
}

impl DetailDocument {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.deadline_hint.is_none()
    }
}

pub fn parse_detail_document(html: &str) -> DetailDocument {
    let document = Html::parse_document(html);
    let deadline_hint = document
        .select(&DEADLINE_ELEMENT)
        .map(|el| normalize_text(&el.text().collect::<String>()))
        .find(|text| !text.is_empty());

    let Some(root) = document.select(&ROOT).next() else {
        return DetailDocument {
            deadline_hint,
            ..DetailDocument::default()
        };
    };

    let mut section = DEFAULT_SECTION.to_string();
    let mut fields = Vec::new();
    let mut raw_details = RawDetails::new();

    for block in root.select(&BLOCKS) {
        if SECTION_HEADER.matches(&block) {
            // Rule markup inside the header contributes no text.
            let name = normalize_text(&block.text().collect::<String>());
            if !name.is_empty() {
                section = name;
            }
            continue;
        }

        let Some(field) = read_field(block, &section) else {
            continue;
        };
        raw_details
            .entry(field.section.clone())
            .or_default()
            .insert(field.label.clone(), field.value.clone());
        fields.push(field);
    }

    DetailDocument {
        fields,
        raw_details,
        deadline_hint,
    }
}

fn read_field(block: ElementRef<'_>, section: &str) -> Option<DetailField> {
    let label_el = block.select(&FIELD_LABEL).next()?;
    let value_el = block.select(&FIELD_VALUE).next()?;

    let label = normalize_text(&label_el.text().collect::<String>());
    let label = label.trim_end_matches(':').trim_end().to_string();
    let value = field_value(value_el);
    if label.is_empty() || value.is_empty() {
        return None;
    }
    Some(DetailField {
        section: section.to_string(),
        label,
        value,
    })
}

/// Inner markup is sanitized; plain text becomes one escaped paragraph.
fn field_value(el: ElementRef<'_>) -> String {
    let has_markup = el.children().any(|child| child.value().is_element());
    if has_markup {
        return sanitize(&el.inner_html());
    }
    let text = normalize_multiline_text(&el.text().collect::<String>());
    if text.is_empty() {
        return String::new();
    }
    format!("<p>{}</p>", html_escape::encode_text(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
        <div id="offre-detail">
          <div class="field"><div class="field-label">Référence :</div><div class="field-value">  R-12 </div></div>
          <h2 class="section-header">Fonction<hr class="sep"></h2>
          <div class="field"><div class="field-label">Description :</div>
            <div class="field-value"><p onclick="x()">Accueil &amp; <em>billetterie</em></p><script>alert(1)</script></div></div>
          <div class="field"><div class="field-label">Horaire</div><div class="field-value">Lundi
              au   vendredi

              9h - 17h &lt;flexible&gt;</div></div>
          <div class="field"><div class="field-label">Vide :</div><div class="field-value"> <span></span> </div></div>
          <div class="field"><div class="field-label"> : </div><div class="field-value">orphelin</div></div>
          <div class="field"><div class="field-label">Description</div><div class="field-value">doublon</div></div>
        </div>
        </body></html>
    "#;

    #[test]
    fn walks_sections_and_fields_in_order() {
        let doc = parse_detail_document(PAGE);
        let triples: Vec<_> = doc
            .fields
            .iter()
            .map(|f| (f.section.as_str(), f.label.as_str(), f.value.as_str()))
            .collect();
        assert_eq!(
            triples,
            vec![
                ("Général", "Référence", "<p>R-12</p>"),
                ("Fonction", "Description", "<p>Accueil &amp; <em>billetterie</em></p>"),
                ("Fonction", "Horaire", "<p>Lundi\nau vendredi\n9h - 17h &lt;flexible&gt;</p>"),
                ("Fonction", "Description", "<p>doublon</p>"),
            ]
        );
    }

    #[test]
    fn raw_details_keep_last_value_per_label() {
        let doc = parse_detail_document(PAGE);
        let fonction = &doc.raw_details["Fonction"];
        assert_eq!(fonction.len(), 2);
        assert_eq!(fonction["Description"], "<p>doublon</p>");
        assert_eq!(doc.fields[1].value, "<p>Accueil &amp; <em>billetterie</em></p>");
        assert_eq!(doc.raw_details["Général"]["Référence"], "<p>R-12</p>");
    }

    #[test]
    fn missing_root_yields_no_fields() {
        let doc = parse_detail_document("<html><body><p>Cette offre n'existe plus.</p></body></html>");
        assert!(doc.is_empty());
        assert!(doc.raw_details.is_empty());
    }
}
