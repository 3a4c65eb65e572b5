//! Listing page parsing: table rows into [`ListingStub`]s plus the page count.

use std::sync::LazyLock;

use cbj_core::text::{normalize_key, normalize_text, parse_dmy_date};
use cbj_core::{ContractType, ListingStub, PostingType, Uid};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::ListingPage;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static ROWS: LazyLock<Selector> = LazyLock::new(|| selector("tr.ligne_paire, tr.ligne_impaire"));
static DATE_CELL: LazyLock<Selector> = LazyLock::new(|| selector("td.date"));
static TITLE_LINK: LazyLock<Selector> = LazyLock::new(|| selector("td.titre a[href]"));
static EMPLOYER_CELL: LazyLock<Selector> = LazyLock::new(|| selector("td.employeur"));
static TYPE_CELL: LazyLock<Selector> = LazyLock::new(|| selector("td.type"));
static CONTRACT_CELL: LazyLock<Selector> = LazyLock::new(|| selector("td.contrat"));
static PAGER_CELL: LazyLock<Selector> = LazyLock::new(|| selector("td.pagination"));
static LAST_PAGE_LINK: LazyLock<Selector> = LazyLock::new(|| selector("a.last[href]"));
static PAGE_OF_TOTAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*/\s*(\d+)").expect("static pager regex"));

/// Everything the row parser needs to absolutize links.
#[derive(Debug, Clone)]
pub struct ListingContext<'a> {
    pub origin: &'a Url,
    pub listing_path: &'a str,
    pub listing_url: &'a str,
}

/// Map a free-text posting type onto the enum.
///
/// Containment on the matching key, checked in the order benevolat, stag, emploi.
pub fn classify_posting_type(label: &str) -> PostingType {
    let key = normalize_key(label);
    if key.contains("benevol") {
        PostingType::Benevolat
    } else if key.contains("stag") {
        PostingType::Stage
    } else if key.contains("emploi") {
        PostingType::Emploi
    } else {
        PostingType::Autre
    }
}

/// Split a contract label on commas into distinct contract tokens, first seen first.
pub fn parse_contract_types(label: &str) -> Vec<ContractType> {
    let mut out = Vec::new();
    for part in label.split(',') {
        let key = normalize_key(part);
        let token = if key.contains("cdd") {
            Some(ContractType::Cdd)
        } else if key.contains("cdi") {
            Some(ContractType::Cdi)
        } else if key.contains("autre") {
            Some(ContractType::Autre)
        } else {
            None
        };
        if let Some(token) = token {
            if !out.contains(&token) {
                out.push(token);
            }
        }
    }
    out
}

/// Absolute URL for a row link; malformed hrefs fall back to the listing path.
pub fn resolve_link(origin: &Url, listing_path: &str, href: &str) -> Url {
    origin
        .join(href.trim())
        .or_else(|_| origin.join(listing_path))
        .unwrap_or_else(|_| origin.clone())
}

/// Positive integer `uid` query parameter, if any.
pub fn extract_uid(url: &Url) -> Option<Uid> {
    url.query_pairs()
        .find(|(k, _)| k == "uid")
        .and_then(|(_, v)| v.trim().parse::<Uid>().ok())
        .filter(|uid| *uid > 0)
}

fn cell_text(row: ElementRef<'_>, sel: &Selector) -> String {
    row.select(sel)
        .next()
        .map(|cell| normalize_text(&cell.text().collect::<String>()))
        .unwrap_or_default()
}

fn parse_row(row: ElementRef<'_>, ctx: &ListingContext<'_>) -> Option<ListingStub> {
    let link = row.select(&TITLE_LINK).next()?;
    let href = link.value().attr("href")?;
    let source_url = resolve_link(ctx.origin, ctx.listing_path, href);
    let uid = extract_uid(&source_url)?;

    let publication_date_raw = cell_text(row, &DATE_CELL);
    let publication_date = parse_dmy_date(&publication_date_raw)?;

    let contract_label = Some(cell_text(row, &CONTRACT_CELL)).filter(|label| !label.is_empty());
    let contract_types = contract_label
        .as_deref()
        .map(parse_contract_types)
        .unwrap_or_default();

    Some(ListingStub {
        uid,
        source_url: source_url.to_string(),
        listing_url: ctx.listing_url.to_string(),
        title: normalize_text(&link.text().collect::<String>()),
        organization: cell_text(row, &EMPLOYER_CELL),
        publication_date,
        publication_date_raw,
        posting_type: classify_posting_type(&cell_text(row, &TYPE_CELL)),
        contract_label,
        contract_types,
    })
}

/// Total page count as rendered, before any clamping. Defaults to 1.
pub fn parse_total_pages(document: &Html, origin: &Url) -> u32 {
    let from_pager = document.select(&PAGER_CELL).find_map(|cell| {
        let text = cell.text().collect::<String>();
        PAGE_OF_TOTAL
            .captures(&text)
            .and_then(|caps| caps[2].parse::<u32>().ok())
    });
    let from_last_link = || {
        document.select(&LAST_PAGE_LINK).find_map(|a| {
            let url = origin.join(a.value().attr("href")?).ok()?;
            url.query_pairs()
                .find(|(k, _)| k == "page")
                .and_then(|(_, v)| v.parse::<u32>().ok())
        })
    };
    from_pager.or_else(from_last_link).unwrap_or(1).max(1)
}

pub fn parse_listing_page(html: &str, ctx: &ListingContext<'_>) -> ListingPage {
    let document = Html::parse_document(html);
    let stubs = document
        .select(&ROWS)
        .filter_map(|row| parse_row(row, ctx))
        .collect();
    ListingPage {
        stubs,
        total_pages: parse_total_pages(&document, ctx.origin),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(workspace_root().join("fixtures/culture-be").join(name))
            .expect("fixture")
    }

    fn origin() -> Url {
        Url::parse("https://www.culture.be").unwrap()
    }

    fn parse(name: &str) -> ListingPage {
        let origin = origin();
        let ctx = ListingContext {
            origin: &origin,
            listing_path: "/emploi/offres/",
            listing_url: "https://www.culture.be/emploi/offres/?page=1",
        };
        parse_listing_page(&fixture(name), &ctx)
    }

    #[test]
    fn posting_types_are_matched_without_case_or_accents() {
        for label in ["Stage", "STAGE", "Stagiaire", "stage de fin d'études"] {
            assert_eq!(classify_posting_type(label), PostingType::Stage, "{label}");
        }
        assert_eq!(classify_posting_type("Bénévolat"), PostingType::Benevolat);
        assert_eq!(classify_posting_type("BENEVOLAT / stage"), PostingType::Benevolat);
        assert_eq!(classify_posting_type("Offre d'emploi"), PostingType::Emploi);
        assert_eq!(classify_posting_type("Formation"), PostingType::Autre);
        assert_eq!(classify_posting_type(""), PostingType::Autre);
    }

    #[test]
    fn contract_label_splits_into_distinct_tokens() {
        assert_eq!(
            parse_contract_types("CDD, CDI, cdd (remplacement)"),
            vec![ContractType::Cdd, ContractType::Cdi]
        );
        assert_eq!(parse_contract_types("Autre"), vec![ContractType::Autre]);
        assert!(parse_contract_types("Temps partiel").is_empty());
    }

    #[test]
    fn malformed_href_falls_back_to_listing_path() {
        let url = resolve_link(&origin(), "/emploi/offres/", "http://[broken");
        assert_eq!(url.as_str(), "https://www.culture.be/emploi/offres/");
        assert_eq!(extract_uid(&url), None);
    }

    #[test]
    fn uid_must_be_a_positive_integer() {
        let parse_uid = |s: &str| extract_uid(&Url::parse(s).unwrap());
        assert_eq!(parse_uid("https://x.be/o?uid=12"), Some(12));
        assert_eq!(parse_uid("https://x.be/o?uid=0"), None);
        assert_eq!(parse_uid("https://x.be/o?uid=-4"), None);
        assert_eq!(parse_uid("https://x.be/o?uid=abc"), None);
        assert_eq!(parse_uid("https://x.be/o?id=12"), None);
    }

    #[test]
    fn first_page_fixture_yields_valid_rows_and_pager_total() {
        let page = parse("listing_page_1.html");
        assert_eq!(page.total_pages, 3);

        let uids: Vec<_> = page.stubs.iter().map(|s| s.uid).collect();
        assert_eq!(uids, vec![5101, 5102, 5103]);

        let first = &page.stubs[0];
        assert_eq!(first.source_url, "https://www.culture.be/emploi/offre/?uid=5101");
        assert_eq!(first.title, "Chargé·e de médiation culturelle");
        assert_eq!(first.organization, "Centre culturel de Namur");
        assert_eq!(first.publication_date_raw, "03-03-2026");
        assert_eq!(first.posting_type, PostingType::Emploi);
        assert_eq!(first.contract_label.as_deref(), Some("CDD, CDI"));
        assert_eq!(first.contract_types, vec![ContractType::Cdd, ContractType::Cdi]);

        assert_eq!(page.stubs[1].posting_type, PostingType::Stage);
        assert_eq!(page.stubs[1].contract_label, None);
        assert!(page.stubs[1].contract_types.is_empty());
        assert_eq!(page.stubs[2].posting_type, PostingType::Benevolat);
    }

    #[test]
    fn last_page_fixture_reads_total_from_last_link() {
        let page = parse("listing_page_last.html");
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.stubs.len(), 1);
        assert_eq!(page.stubs[0].uid, 5201);
    }

    #[test]
    fn page_without_pager_defaults_to_one() {
        let origin = origin();
        let ctx = ListingContext {
            origin: &origin,
            listing_path: "/emploi/offres/",
            listing_url: "https://www.culture.be/emploi/offres/?page=1",
        };
        let page = parse_listing_page("<html><body><table></table></body></html>", &ctx);
        assert_eq!(page.total_pages, 1);
        assert!(page.stubs.is_empty());
    }
}
