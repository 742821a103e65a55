//! Site metadata extraction for the builder's "paste a URL" flow.
//!
//! Extraction is heuristic by design and must never hard-fail: any network
//! error, bad status, empty body or parked-domain page degrades to a
//! hostname-derived fallback payload flagged with `fallback: true`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;
use utoipa::ToSchema;

pub const DEFAULT_THEME_COLOR: &str = "#000000";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; AppshellBot/1.0; +https://appshell.dev)";

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SiteMetadata {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub theme_color: String,
    pub icon: String,
    pub privacy_policy_url: Option<String>,
    pub terms_url: Option<String>,
    /// True when extraction failed and the payload is hostname-derived.
    pub fallback: bool,
}

/// Fetch a page and extract metadata. Always returns a payload.
pub async fn scrape_site(client: &reqwest::Client, raw_url: &str, timeout_secs: u64) -> SiteMetadata {
    let normalized = normalize_url(raw_url);
    let Ok(base) = Url::parse(&normalized) else {
        return fallback_for_host(raw_url, raw_url);
    };
    let resp = client
        .get(base.clone())
        .timeout(Duration::from_secs(timeout_secs))
        .header("User-Agent", USER_AGENT)
        .header("Accept", "text/html,application/xhtml+xml")
        .send()
        .await;
    let html = match resp {
        Ok(r) if r.status().is_success() => r.text().await.unwrap_or_default(),
        Ok(r) => {
            debug!(url = %base, status = %r.status(), "scrape got non-success status");
            String::new()
        }
        Err(e) => {
            debug!(url = %base, error = %e, "scrape fetch failed");
            String::new()
        }
    };
    if html.trim().is_empty() || looks_parked(&html) {
        return fallback_for_url(&base);
    }
    extract(&base, &html)
}

fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    }
}

fn fallback_for_url(base: &Url) -> SiteMetadata {
    let host = base.host_str().unwrap_or("");
    fallback_for_host(base.as_str(), host)
}

fn fallback_for_host(url: &str, host: &str) -> SiteMetadata {
    SiteMetadata {
        url: url.to_string(),
        title: hostname_slug(host),
        description: None,
        theme_color: DEFAULT_THEME_COLOR.into(),
        icon: favicon_service(host),
        privacy_policy_url: None,
        terms_url: None,
        fallback: true,
    }
}

/// "www.my-shop.co.il" -> "My Shop"
pub fn hostname_slug(host: &str) -> String {
    let label = host
        .trim()
        .trim_start_matches("www.")
        .split('.')
        .find(|s| !s.is_empty())
        .unwrap_or("app");
    let words: Vec<String> = label
        .split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        "App".to_string()
    } else {
        words.join(" ")
    }
}

fn favicon_service(host: &str) -> String {
    format!("https://www.google.com/s2/favicons?domain={host}&sz=128")
}

/// Parked-domain heuristic: sale/parking keywords in the title of a short page.
pub fn looks_parked(html: &str) -> bool {
    if html.len() >= 2048 {
        return false;
    }
    let title = title_tag(html).unwrap_or_default().to_lowercase();
    const PARKED: [&str; 5] = [
        "domain for sale",
        "buy this domain",
        "is for sale",
        "parked domain",
        "domain parking",
    ];
    PARKED.iter().any(|k| title.contains(k))
}

pub fn extract(base: &Url, html: &str) -> SiteMetadata {
    let host = base.host_str().unwrap_or("");
    let title = meta_content(html, "property", "og:title")
        .or_else(|| meta_content(html, "name", "twitter:title"))
        .or_else(|| meta_content(html, "name", "apple-mobile-web-app-title"))
        .or_else(|| title_tag(html))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| hostname_slug(host));
    let description = meta_content(html, "property", "og:description")
        .or_else(|| meta_content(html, "name", "description"))
        .filter(|d| !d.is_empty());
    let theme_color =
        meta_content(html, "name", "theme-color").unwrap_or_else(|| DEFAULT_THEME_COLOR.into());
    let icon = icon_url(base, html).unwrap_or_else(|| favicon_service(host));
    let (privacy_policy_url, terms_url) = legal_links(base, html);
    SiteMetadata {
        url: base.to_string(),
        title,
        description,
        theme_color,
        icon,
        privacy_policy_url,
        terms_url,
        fallback: false,
    }
}

fn icon_url(base: &Url, html: &str) -> Option<String> {
    // Priority: apple-touch-icon, then any rel containing "icon"
    // (covers "icon" and "shortcut icon"), then og:image.
    let href = link_href(html, "apple-touch-icon")
        .or_else(|| link_href(html, "icon"))
        .or_else(|| meta_content(html, "property", "og:image"))?;
    absolutize(base, &href)
}

fn absolutize(base: &Url, href: &str) -> Option<String> {
    base.join(href.trim()).ok().map(|u| u.to_string())
}

/// `<meta {attr}="{value}" content="...">` in either attribute order.
fn meta_content(html: &str, attr: &str, value: &str) -> Option<String> {
    let v = regex::escape(value);
    let forward = Regex::new(&format!(
        r#"(?is)<meta\b[^>]*\b{attr}\s*=\s*["']{v}["'][^>]*\bcontent\s*=\s*["']([^"']*)["']"#
    ))
    .ok()?;
    if let Some(c) = forward.captures(html) {
        return Some(decode_entities(c[1].trim()));
    }
    let reversed = Regex::new(&format!(
        r#"(?is)<meta\b[^>]*\bcontent\s*=\s*["']([^"']*)["'][^>]*\b{attr}\s*=\s*["']{v}["']"#
    ))
    .ok()?;
    reversed.captures(html).map(|c| decode_entities(c[1].trim()))
}

/// href of the first `<link>` whose rel attribute contains `rel_token`.
fn link_href(html: &str, rel_token: &str) -> Option<String> {
    static LINK_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"(?is)<link\b[^>]*>"#).expect("static regex"));
    static REL_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"(?is)\brel\s*=\s*["']([^"']*)["']"#).expect("static regex"));
    static HREF_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"(?is)\bhref\s*=\s*["']([^"']*)["']"#).expect("static regex"));
    for tag in LINK_RE.find_iter(html) {
        let tag = tag.as_str();
        let Some(rel) = REL_RE.captures(tag) else { continue };
        if !rel[1].to_lowercase().contains(rel_token) {
            continue;
        }
        if let Some(href) = HREF_RE.captures(tag) {
            let href = href[1].trim();
            if !href.is_empty() {
                return Some(href.to_string());
            }
        }
    }
    None
}

fn title_tag(html: &str) -> Option<String> {
    static TITLE_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("static regex"));
    TITLE_RE
        .captures(html)
        .map(|c| decode_entities(c[1].trim()))
        .filter(|t| !t.is_empty())
}

/// Best-effort privacy-policy / terms links, scanning anchor text and href
/// keywords. Includes the Hebrew variants the builder's audience uses.
fn legal_links(base: &Url, html: &str) -> (Option<String>, Option<String>) {
    static ANCHOR_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"(?is)<a\b[^>]*\bhref\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
            .expect("static regex")
    });
    static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));
    const PRIVACY_KEYWORDS: [&str; 4] = ["privacy", "privacy-policy", "פרטיות", "הצהרת פרטיות"];
    const TERMS_KEYWORDS: [&str; 5] = ["terms", "terms-of-service", "tos", "תנאי", "תקנון"];
    let mut privacy = None;
    let mut terms = None;
    for cap in ANCHOR_RE.captures_iter(html) {
        let href = cap[1].trim().to_string();
        if href.starts_with('#') || href.starts_with("javascript:") {
            continue;
        }
        let text = TAG_RE.replace_all(&cap[2], " ");
        let haystack = format!("{} {}", href.to_lowercase(), text.to_lowercase());
        if privacy.is_none() && PRIVACY_KEYWORDS.iter().any(|k| haystack.contains(k)) {
            privacy = absolutize(base, &href);
        } else if terms.is_none() && TERMS_KEYWORDS.iter().any(|k| haystack.contains(k)) {
            terms = absolutize(base, &href);
        }
        if privacy.is_some() && terms.is_some() {
            break;
        }
    }
    (privacy, terms)
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://shop.example.com/store/").unwrap()
    }

    #[test]
    fn title_prefers_open_graph() {
        let html = r#"<html><head>
            <title>Fallback Title</title>
            <meta property="og:title" content="OG Title"/>
            <meta name="twitter:title" content="TW Title"/>
        </head></html>"#;
        let meta = extract(&base(), html);
        assert_eq!(meta.title, "OG Title");
        assert!(!meta.fallback);
    }

    #[test]
    fn title_falls_back_through_the_chain() {
        let html = "<html><head><title> Plain &amp; Simple </title></head></html>";
        assert_eq!(extract(&base(), html).title, "Plain & Simple");
        let empty = "<html><head></head><body></body></html>";
        assert_eq!(extract(&base(), empty).title, "Shop");
    }

    #[test]
    fn meta_content_handles_reversed_attribute_order() {
        let html = r##"<meta content="#102030" name="theme-color">"##;
        let meta = extract(&base(), html);
        assert_eq!(meta.theme_color, "#102030");
    }

    #[test]
    fn theme_color_defaults_to_black() {
        assert_eq!(extract(&base(), "<html></html>").theme_color, DEFAULT_THEME_COLOR);
    }

    #[test]
    fn icon_priority_and_absolutization() {
        let html = r#"
            <link rel="shortcut icon" href="/favicon.ico">
            <link rel="apple-touch-icon" href="icons/touch.png">
        "#;
        let meta = extract(&base(), html);
        assert_eq!(meta.icon, "https://shop.example.com/store/icons/touch.png");
        let html = r#"<link rel="shortcut icon" href="/favicon.ico">"#;
        let meta = extract(&base(), html);
        assert_eq!(meta.icon, "https://shop.example.com/favicon.ico");
    }

    #[test]
    fn icon_falls_back_to_og_image_then_favicon_service() {
        let html = r#"<meta property="og:image" content="https://cdn.example/og.png">"#;
        assert_eq!(extract(&base(), html).icon, "https://cdn.example/og.png");
        let meta = extract(&base(), "<html></html>");
        assert_eq!(meta.icon, "https://www.google.com/s2/favicons?domain=shop.example.com&sz=128");
    }

    #[test]
    fn legal_links_match_english_and_hebrew() {
        let html = r#"
            <a href="/legal/privacy">Privacy Policy</a>
            <a href="/page7">תקנון האתר</a>
        "#;
        let (privacy, terms) = legal_links(&base(), html);
        assert_eq!(privacy.as_deref(), Some("https://shop.example.com/legal/privacy"));
        assert_eq!(terms.as_deref(), Some("https://shop.example.com/page7"));
    }

    #[test]
    fn legal_links_ignore_fragments_and_js() {
        let html = r##"<a href="#privacy">privacy</a><a href="javascript:void(0)">terms</a>"##;
        let (privacy, terms) = legal_links(&base(), html);
        assert!(privacy.is_none());
        assert!(terms.is_none());
    }

    #[test]
    fn parked_domain_detection() {
        let parked = "<html><head><title>example.com is for sale!</title></head></html>";
        assert!(looks_parked(parked));
        let real_but_short = "<html><head><title>My Shop</title></head></html>";
        assert!(!looks_parked(real_but_short));
        let long_page = format!(
            "<html><head><title>domain for sale</title></head><body>{}</body></html>",
            "x".repeat(4000)
        );
        assert!(!looks_parked(&long_page));
    }

    #[test]
    fn hostname_slugs() {
        assert_eq!(hostname_slug("www.my-shop.co.il"), "My Shop");
        assert_eq!(hostname_slug("example.com"), "Example");
        assert_eq!(hostname_slug(""), "App");
    }

    #[tokio::test]
    async fn unreachable_host_degrades_to_fallback() {
        let client = reqwest::Client::new();
        // Nothing listens on port 1; connection is refused immediately.
        let meta = scrape_site(&client, "http://127.0.0.1:1/", 2).await;
        assert!(meta.fallback);
        assert_eq!(meta.theme_color, DEFAULT_THEME_COLOR);
        assert!(meta.icon.contains("favicons"));
        assert!(!meta.title.is_empty());
    }

    #[tokio::test]
    async fn unparseable_url_degrades_to_fallback() {
        let client = reqwest::Client::new();
        let meta = scrape_site(&client, "http://[bad", 2).await;
        assert!(meta.fallback);
        assert!(!meta.title.is_empty());
    }
}
