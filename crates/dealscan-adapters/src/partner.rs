use std::sync::Arc;

use async_trait::async_trait;
use dealscan_core::{Cursor, Source};
use dealscan_storage::HttpFetcher;
use serde::Deserialize;

use crate::{FetchError, SourceFetcher, SourceItem, SourcePage};

/// Partner sales platform: server-side paging over `GET /deals?offset=&limit=`.
#[derive(Debug)]
pub struct PartnerApiFetcher {
    base_url: String,
    api_key: Option<String>,
    http: Arc<HttpFetcher>,
}

#[derive(Debug, Deserialize)]
struct PartnerDealsPage {
    total: u64,
    #[serde(default)]
    deals: Vec<SourceItem>,
}

impl PartnerApiFetcher {
    pub fn new(base_url: String, api_key: Option<String>, http: Arc<HttpFetcher>) -> Self {
        Self {
            base_url,
            api_key,
            http,
        }
    }

    fn page_url(&self, cursor: Cursor, size: u64) -> String {
        format!(
            "{}/deals?offset={}&limit={}",
            self.base_url.trim_end_matches('/'),
            cursor.offset(),
            size
        )
    }
}

pub fn parse_partner_page(body: &[u8]) -> Result<SourcePage, FetchError> {
    let page: PartnerDealsPage = serde_json::from_slice(body).map_err(|e| FetchError::Parse {
        origin: Source::Partner,
        message: e.to_string(),
    })?;
    Ok(SourcePage {
        items: page.deals,
        total_available: page.total,
    })
}

#[async_trait]
impl SourceFetcher for PartnerApiFetcher {
    fn source(&self) -> Source {
        Source::Partner
    }

    async fn list_page(&self, cursor: Cursor, size: u64) -> Result<SourcePage, FetchError> {
        let url = self.page_url(cursor, size);
        let response = self
            .http
            .fetch_bytes(Source::Partner, &url, self.api_key.as_deref())
            .await?;
        parse_partner_page(&response.body)
    }
}
