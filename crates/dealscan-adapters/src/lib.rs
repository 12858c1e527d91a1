//! Source fetcher contracts, concrete fetchers, and the record normalizer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dealscan_core::{Cursor, Source};
use dealscan_storage::{HttpError, HttpFetcher};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

mod fixture;
mod html;
mod normalize;
mod partner;

pub use fixture::{load_fixture_file, FixtureFetcher, FixtureFile};
pub use html::{parse_listing_html, HtmlListingFetcher};
pub use normalize::{normalize, parse_loose_number, NormalizeError};
pub use partner::{parse_partner_page, PartnerApiFetcher};

/// Raw, source-specific item exactly as the fetcher produced it.
pub type SourceItem = JsonValue;

#[derive(Debug, Clone, PartialEq)]
pub struct SourcePage {
    pub items: Vec<SourceItem>,
    pub total_available: u64,
}

impl SourcePage {
    /// Cut `[cursor, cursor + size)` out of a fully materialized item list.
    pub fn slice(all: Vec<SourceItem>, cursor: Cursor, size: u64) -> Self {
        let total_available = all.len() as u64;
        let items = all
            .into_iter()
            .skip(cursor.offset() as usize)
            .take(size as usize)
            .collect();
        Self {
            items,
            total_available,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("unparseable {origin} response: {message}")]
    Parse { origin: Source, message: String },
    #[error(transparent)]
    Fixture(#[from] anyhow::Error),
}

/// One external origin's paging interface. Scraping/parsing mechanics stay behind it.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn source(&self) -> Source;

    async fn list_page(&self, cursor: Cursor, size: u64) -> Result<SourcePage, FetchError>;
}

/// How a source is fetched, as declared in `sources.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetcherSettings {
    Fixture {
        path: PathBuf,
    },
    HtmlListing {
        listing_url: String,
    },
    PartnerApi {
        base_url: String,
        #[serde(default)]
        api_key_env: Option<String>,
    },
}

#[derive(Debug, Error)]
#[error("{origin} cannot use a `{kind}` fetcher")]
pub struct UnsupportedFetcher {
    pub origin: Source,
    pub kind: &'static str,
}

pub fn build_fetcher(
    source: Source,
    settings: &FetcherSettings,
    http: Arc<HttpFetcher>,
    workspace_root: &Path,
) -> Result<Arc<dyn SourceFetcher>, UnsupportedFetcher> {
    match settings {
        FetcherSettings::Fixture { path } => Ok(Arc::new(FixtureFetcher::from_path(
            source,
            workspace_root.join(path),
        ))),
        FetcherSettings::HtmlListing { listing_url } if source.is_competitor() => Ok(Arc::new(
            HtmlListingFetcher::new(source, listing_url.clone(), http),
        )),
        FetcherSettings::HtmlListing { .. } => Err(UnsupportedFetcher {
            origin: source,
            kind: "html_listing",
        }),
        FetcherSettings::PartnerApi {
            base_url,
            api_key_env,
        } if source == Source::Partner => {
            let api_key = api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
                .filter(|key| !key.trim().is_empty());
            if api_key.is_none() {
                tracing::warn!(%source, "partner API key not configured; requests will be unauthenticated");
            }
            Ok(Arc::new(PartnerApiFetcher::new(base_url.clone(), api_key, http)))
        }
        FetcherSettings::PartnerApi { .. } => Err(UnsupportedFetcher {
            origin: source,
            kind: "partner_api",
        }),
    }
}
