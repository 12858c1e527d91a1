use std::sync::Arc;

use async_trait::async_trait;
use dealscan_core::{Cursor, Source};
use dealscan_storage::HttpFetcher;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Map, Value as JsonValue};

use crate::{FetchError, SourceFetcher, SourceItem, SourcePage};

/// Competitor marketplace whose full deal listing is one HTML page of cards.
#[derive(Debug)]
pub struct HtmlListingFetcher {
    source: Source,
    listing_url: String,
    http: Arc<HttpFetcher>,
}

impl HtmlListingFetcher {
    pub fn new(source: Source, listing_url: String, http: Arc<HttpFetcher>) -> Self {
        Self {
            source,
            listing_url,
            http,
        }
    }
}

#[async_trait]
impl SourceFetcher for HtmlListingFetcher {
    fn source(&self) -> Source {
        self.source
    }

    async fn list_page(&self, cursor: Cursor, size: u64) -> Result<SourcePage, FetchError> {
        let response = self
            .http
            .fetch_bytes(self.source, &self.listing_url, None)
            .await?;
        let html = String::from_utf8_lossy(&response.body);
        let items = parse_listing_html(&html).map_err(|message| FetchError::Parse {
            origin: self.source,
            message,
        })?;
        Ok(SourcePage::slice(items, cursor, size))
    }
}

fn selector(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|e| e.to_string())
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn first_text(card: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    card.select(sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

fn first_attr(card: &ElementRef<'_>, sel: &Selector, attr: &str) -> Option<String> {
    card.select(sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

/// Extract every `[data-deal-id]` card in document order. Fields missing from a
/// card are left out of its item; the normalizer decides what that means.
pub fn parse_listing_html(html: &str) -> Result<Vec<SourceItem>, String> {
    let document = Html::parse_document(html);
    let card_sel = selector("[data-deal-id]")?;
    let title_sel = selector(".deal-title")?;
    let link_sel = selector("a[href]")?;
    let sold_sel = selector(".deal-sold")?;
    let price_sel = selector(".deal-price")?;
    let ends_sel = selector("time[datetime]")?;

    let items = document
        .select(&card_sel)
        .map(|card| {
            let mut item = Map::new();
            let fields = [
                ("id", card.value().attr("data-deal-id").and_then(|s| text_or_none(s.to_string()))),
                ("title", first_text(&card, &title_sel)),
                ("url", first_attr(&card, &link_sel, "href")),
                ("sold", first_text(&card, &sold_sel)),
                ("price", first_text(&card, &price_sel)),
                ("endsAt", first_attr(&card, &ends_sel, "datetime")),
            ];
            for (key, value) in fields {
                if let Some(value) = value {
                    item.insert(key.to_string(), json!(value));
                }
            }
            JsonValue::Object(item)
        })
        .collect();
    Ok(items)
}
