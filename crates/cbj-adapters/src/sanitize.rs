//! Allow-list HTML sanitizer for scraped rich-text fields.
//!
//! Two independent passes over a parsed fragment:
//!
//! 1. [`filter_allowed`] keeps only `p br ul ol li strong em a`, keeps `href`
//!    and `title` on links, and drops hrefs whose scheme is not http, https
//!    or mailto. Other tags are unwrapped: their text and allowed descendants
//!    stay in place, except raw-text
//!    containers such as `script`, which are dropped with their content.
//! 2. [`fix_up`] strips `class`, `style` and `on*` attributes, delinks anchors
//!    whose href is empty and forces `rel` on the rest.
//!
//! [`sanitize`] chains both and collapses visually-empty output to `""`.

use scraper::{ElementRef, Html, Node};

use cbj_core::text::normalize_text;

pub const ALLOWED_TAGS: &[&str] = &["p", "br", "ul", "ol", "li", "strong", "em", "a"];
pub const LINK_REL: &str = "noopener noreferrer nofollow";

const ALLOWED_SCHEMES: &[&str] = &["http", "https", "mailto"];
const DROPPED_WITH_CONTENT: &[&str] = &[
    "script", "style", "textarea", "noscript", "template", "iframe", "object",
];
const VOID_TAGS: &[&str] = &["br", "hr", "img", "wbr", "input", "meta", "link"];
/// Elements whose boundaries separate words in plain-text output.
const TEXT_BREAK_TAGS: &[&str] = &[
    "br", "p", "li", "ul", "ol", "div", "section", "article", "blockquote", "table", "tr", "td",
    "th", "dt", "dd", "h1", "h2", "h3", "h4", "h5", "h6", "hr",
];

pub fn sanitize(input: &str) -> String {
    if input.trim().is_empty() {
        return String::new();
    }
    let fixed = fix_up(&filter_allowed(input));
    if html_to_text(&fixed).is_empty() {
        return String::new();
    }
    fixed.trim().to_string()
}

/// Plain text of a fragment, whitespace-collapsed. Line breaks and block
/// boundaries become a single space.
pub fn html_to_text(fragment: &str) -> String {
    let parsed = Html::parse_fragment(fragment);
    let mut text = String::with_capacity(fragment.len());
    collect_text(parsed.root_element(), &mut text);
    normalize_text(&text)
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&**text),
            Node::Element(child_value) => {
                let breaks = TEXT_BREAK_TAGS.contains(&child_value.name());
                if breaks {
                    out.push(' ');
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
                if breaks {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

/// First pass: allow-list filter.
pub fn filter_allowed(input: &str) -> String {
    let parsed = Html::parse_fragment(input);
    let mut out = String::with_capacity(input.len());
    write_allowed_children(parsed.root_element(), &mut out);
    out
}

/// Second pass: attribute stripping and link fix-ups.
pub fn fix_up(filtered: &str) -> String {
    let parsed = Html::parse_fragment(filtered);
    let mut out = String::with_capacity(filtered.len() + 32);
    write_fixed_children(parsed.root_element(), &mut out);
    out
}

fn write_allowed_children(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&html_escape::encode_text(&**text)),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    write_allowed_element(child_el, out);
                }
            }
            _ => {}
        }
    }
}

fn write_allowed_element(el: ElementRef<'_>, out: &mut String) {
    let name = el.value().name();
    if DROPPED_WITH_CONTENT.contains(&name) {
        return;
    }
    if !ALLOWED_TAGS.contains(&name) {
        write_allowed_children(el, out);
        return;
    }

    out.push('<');
    out.push_str(name);
    if name == "a" {
        if let Some(href) = el.value().attr("href").filter(|h| href_allowed(h)) {
            push_attr(out, "href", href);
        }
        if let Some(title) = el.value().attr("title") {
            push_attr(out, "title", title);
        }
    }
    out.push('>');
    if name == "br" {
        return;
    }
    write_allowed_children(el, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

/// Relative references pass; protocol-relative and foreign schemes do not.
fn href_allowed(href: &str) -> bool {
    let compact: String = href
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect();
    if compact.starts_with("//") || compact.starts_with("\\\\") {
        return false;
    }
    match scheme_of(&compact) {
        Some(scheme) => ALLOWED_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()),
        None => true,
    }
}

fn scheme_of(href: &str) -> Option<&str> {
    let colon = href.find(':')?;
    let candidate = &href[..colon];
    let mut chars = candidate.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Some(candidate)
    } else {
        None
    }
}

fn write_fixed_children(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&html_escape::encode_text(&**text)),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    write_fixed_element(child_el, out);
                }
            }
            _ => {}
        }
    }
}

fn stripped_attr(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "class" || lower == "style" || lower.starts_with("on")
}

fn write_fixed_element(el: ElementRef<'_>, out: &mut String) {
    let name = el.value().name();
    let is_link = name == "a";
    let href = el.value().attr("href").map(normalize_text).unwrap_or_default();

    if is_link && href.is_empty() {
        out.push_str(&html_escape::encode_text(&el.text().collect::<String>()));
        return;
    }

    let mut kept: Vec<(&str, &str)> = el
        .value()
        .attrs()
        .filter(|(attr, _)| !stripped_attr(attr))
        .filter(|(attr, _)| !(is_link && matches!(*attr, "href" | "title" | "rel")))
        .collect();
    kept.sort_by(|a, b| a.0.cmp(b.0));

    out.push('<');
    out.push_str(name);
    if is_link {
        push_attr(out, "href", &href);
        if let Some(title) = el.value().attr("title") {
            push_attr(out, "title", title);
        }
    }
    for (attr, value) in kept {
        push_attr(out, attr, value);
    }
    if is_link {
        push_attr(out, "rel", LINK_REL);
    }
    out.push('>');
    if VOID_TAGS.contains(&name) {
        return;
    }
    write_fixed_children(el, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(&html_escape::encode_double_quoted_attribute(value));
    out.push('"');
}
