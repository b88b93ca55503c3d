use anyhow::{bail, Context, Result};
use quick_xml::events::Event;
use regex::Regex;
use reqwest::Client;
use tracing::{info, warn};

/// Nested `<sitemapindex>` files are followed this many levels deep.
const MAX_INDEX_DEPTH: usize = 2;

/// Fetch a sitemap (or sitemap index) and return the page URLs it lists,
/// optionally keeping only those matching `pattern`.
pub async fn fetch_sitemap_urls(
    client: &Client,
    sitemap_url: &str,
    pattern: Option<&Regex>,
) -> Result<Vec<String>> {
    let mut pending = vec![(sitemap_url.to_string(), 0usize)];
    let mut all_urls = Vec::new();

    while let Some((url, depth)) = pending.pop() {
        info!("Fetching sitemap: {}", url);
        let xml = client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
            .with_context(|| format!("Failed to fetch sitemap {}", url))?;

        match parse_sitemap(&xml)? {
            Sitemap::UrlSet(urls) => all_urls.extend(urls),
            Sitemap::Index(children) if depth < MAX_INDEX_DEPTH => {
                info!("Sitemap index with {} children", children.len());
                pending.extend(children.into_iter().rev().map(|c| (c, depth + 1)));
            }
            Sitemap::Index(children) => {
                warn!("Ignoring {} nested sitemaps below {}", children.len(), url);
            }
        }
    }
    info!("Total URLs in sitemap: {}", all_urls.len());

    let filtered: Vec<String> = match pattern {
        Some(re) => all_urls.into_iter().filter(|u| re.is_match(u)).collect(),
        None => all_urls,
    };
    info!("URLs after filtering: {}", filtered.len());
    Ok(filtered)
}

#[derive(Debug, PartialEq, Eq)]
enum Sitemap {
    UrlSet(Vec<String>),
    Index(Vec<String>),
}

/// Parse a `<urlset>` or `<sitemapindex>` document and return its `<loc>` URLs.
fn parse_sitemap(xml: &str) -> Result<Sitemap> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut root: Option<Vec<u8>> = None;
    let mut locs = Vec::new();
    let mut in_entry = false;
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"urlset" | b"sitemapindex" if root.is_none() => root = Some(name),
                    b"url" | b"sitemap" => in_entry = true,
                    b"loc" if in_entry => in_loc = true,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) if in_loc => {
                let loc = e.unescape()?.trim().to_string();
                if !loc.is_empty() {
                    locs.push(loc);
                }
            }
            Ok(Event::CData(e)) if in_loc => {
                let loc = String::from_utf8_lossy(&e.into_inner()).trim().to_string();
                if !loc.is_empty() {
                    locs.push(loc);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"loc" => in_loc = false,
                b"url" | b"sitemap" => in_entry = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }

    match root.as_deref() {
        Some(b"urlset") => Ok(Sitemap::UrlSet(locs)),
        Some(b"sitemapindex") => Ok(Sitemap::Index(locs)),
        _ => bail!("Not a sitemap: no <urlset> or <sitemapindex> root"),
    }
}
