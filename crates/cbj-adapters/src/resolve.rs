//! Logical field resolution over a walked detail page.

use std::sync::LazyLock;

use cbj_core::text::{normalize_key, normalize_text, parse_dmy_date};
use cbj_core::{DetailField, ParsedDetail};
use regex::Regex;

use crate::detail::DetailDocument;
use crate::sanitize::html_to_text;

static DATE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{2})[-/.](\d{2})[-/.](\d{4})\b").expect("static date token regex")
});

/// First field whose label key contains `label_needle`, optionally restricted
/// to sections whose key contains `section_needle`.
pub fn find_detail_value<'a>(
    fields: &'a [DetailField],
    label_needle: &str,
    section_needle: Option<&str>,
) -> Option<&'a str> {
    let label_needle = normalize_key(label_needle);
    let section_needle = section_needle.map(normalize_key);
    fields
        .iter()
        .find(|field| {
            normalize_key(&field.label).contains(&label_needle)
                && section_needle
                    .as_deref()
                    .is_none_or(|needle| normalize_key(&field.section).contains(needle))
        })
        .map(|field| field.value.as_str())
}

/// First candidate with visible text.
pub fn first_non_empty<I, S>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = Option<S>>,
    S: Into<String>,
{
    candidates
        .into_iter()
        .flatten()
        .map(Into::into)
        .find(|value| !html_to_text(value).is_empty())
}

/// First `DD-MM-YYYY` token in the text, exactly as written (`/` and `.` separators included).
pub fn extract_date_token(text: &str) -> Option<String> {
    DATE_TOKEN.find(text).map(|token| token.as_str().to_string())
}

fn fields_in_section<'a>(fields: &'a [DetailField], section_needle: &str) -> Vec<&'a DetailField> {
    let needle = normalize_key(section_needle);
    fields
        .iter()
        .filter(|field| normalize_key(&field.section).contains(&needle))
        .collect()
}

fn labelled_block(label: &str, value: &str) -> String {
    format!(
        "<p><strong>{}</strong></p>{value}",
        html_escape::encode_text(label)
    )
}

fn resolve_requirements(fields: &[DetailField]) -> Option<String> {
    let profile = fields_in_section(fields, "profil");
    if profile.is_empty() {
        return None;
    }

    let mut blocks = Vec::new();
    for needle in ["qualifications requises", "diplome", "experience"] {
        let key = normalize_key(needle);
        if let Some(field) = profile
            .iter()
            .find(|field| normalize_key(&field.label).contains(&key))
        {
            blocks.push(labelled_block(&field.label, &field.value));
        }
    }
    if blocks.is_empty() {
        blocks = profile.iter().map(|field| field.value.clone()).collect();
    }
    first_non_empty([Some(blocks.concat())])
}

fn resolve_contact(fields: &[DetailField]) -> Option<String> {
    let contact = fields_in_section(fields, "contact");
    let joined = contact
        .iter()
        .map(|field| labelled_block(&field.label, &field.value))
        .collect::<String>();
    first_non_empty([Some(joined)])
}

fn resolve_deadline(doc: &DetailDocument) -> Option<String> {
    let fields = &doc.fields;
    doc.deadline_hint
        .as_deref()
        .and_then(extract_date_token)
        .or_else(|| {
            find_detail_value(fields, "candidature", None)
                .map(html_to_text)
                .and_then(|text| extract_date_token(&text))
        })
        .or_else(|| {
            first_non_empty([
                find_detail_value(fields, "modalite", None),
                find_detail_value(fields, "conditions", None),
            ])
            .map(|value| html_to_text(&value))
            .and_then(|text| extract_date_token(&text))
        })
}

/// Resolve every logical field. Unresolvable fields stay `None`.
pub fn resolve_detail(doc: &DetailDocument) -> ParsedDetail {
    let f = doc.fields.as_slice();
    let find = |label: &str, section: Option<&str>| find_detail_value(f, label, section);

    let deadline_raw = resolve_deadline(doc);
    let deadline = deadline_raw
        .as_deref()
        .and_then(|token| parse_dmy_date(&token.replace(['/', '.'], "-")));

    let location = first_non_empty([find("lieu", None), find("adresse", None)])
        .map(|value| normalize_text(&html_to_text(&value)));

    ParsedDetail {
        location,
        deadline,
        deadline_raw,
        description: first_non_empty([
            find("description", Some("fonction")),
            find("description", Some("poste")),
            find("mission", None),
        ]),
        requirements: resolve_requirements(f),
        contract_details: first_non_empty([find("contrat", None)]),
        regime: first_non_empty([find("regime", None)]),
        application_instructions: first_non_empty([
            find("candidature", None),
            find("modalite", None),
            find("comment postuler", None),
        ]),
        documents_required: first_non_empty([find("document", None), find("pieces", None)]),
        comments: first_non_empty([find("commentaire", None), find("remarque", None)]),
        employer_description: first_non_empty([
            find("description", Some("employeur")),
            find("presentation", Some("employeur")),
        ]),
        employer_sectors: first_non_empty([find("secteur", None)]),
        contact_details: resolve_contact(f),
        more_info: first_non_empty([
            find("plus d info", None),
            find("informations complementaires", None),
        ]),
        raw_details: if doc.raw_details.is_empty() {
            None
        } else {
            serde_json::to_value(&doc.raw_details).ok()
        },
    }
}
