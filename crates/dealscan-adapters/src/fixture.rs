use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealscan_core::{Cursor, Source};
use serde::{Deserialize, Serialize};

use crate::{FetchError, SourceFetcher, SourceItem, SourcePage};

/// Captured listing for offline runs: raw items in the source's own schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureFile {
    pub source: Source,
    #[serde(default)]
    pub captured_from_url: Option<String>,
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
    pub items: Vec<SourceItem>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub fn load_fixture_file(path: impl AsRef<Path>) -> Result<FixtureFile> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_fixture(&data, path)
}

fn parse_fixture(data: &str, path: &Path) -> Result<FixtureFile> {
    serde_json::from_str(data).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Clone)]
enum FixtureOrigin {
    Path(PathBuf),
    Inline(Vec<SourceItem>),
}

/// Serves pages out of a fixture file (re-read on every page) or an in-memory list.
#[derive(Debug, Clone)]
pub struct FixtureFetcher {
    source: Source,
    origin: FixtureOrigin,
}

impl FixtureFetcher {
    pub fn from_path(source: Source, path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            origin: FixtureOrigin::Path(path.into()),
        }
    }

    pub fn from_items(source: Source, items: Vec<SourceItem>) -> Self {
        Self {
            source,
            origin: FixtureOrigin::Inline(items),
        }
    }

    async fn all_items(&self) -> Result<Vec<SourceItem>> {
        match &self.origin {
            FixtureOrigin::Inline(items) => Ok(items.clone()),
            FixtureOrigin::Path(path) => {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                let fixture = parse_fixture(&data, path)?;
                if fixture.source != self.source {
                    anyhow::bail!(
                        "fixture {} holds {} items, expected {}",
                        path.display(),
                        fixture.source,
                        self.source
                    );
                }
                Ok(fixture.items)
            }
        }
    }
}

#[async_trait]
impl SourceFetcher for FixtureFetcher {
    fn source(&self) -> Source {
        self.source
    }

    async fn list_page(&self, cursor: Cursor, size: u64) -> Result<SourcePage, FetchError> {
        let items = self.all_items().await?;
        Ok(SourcePage::slice(items, cursor, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[tokio::test]
    async fn file_fixture_is_paged() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let fixture = json!({
            "source": "citybuys",
            "items": [{ "id": "a" }, { "id": "b" }, { "id": "c" }]
        });
        write!(file, "{fixture}").unwrap();

        let fetcher = FixtureFetcher::from_path(Source::Citybuys, file.path());
        let page = fetcher.list_page(Cursor::new(2), 2).await.unwrap();
        assert_eq!(page.total_available, 3);
        assert_eq!(page.items, vec![json!({ "id": "c" })]);
    }

    #[tokio::test]
    async fn fixture_for_other_source_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", json!({ "source": "partner", "items": [] })).unwrap();

        let fetcher = FixtureFetcher::from_path(Source::Dealpulse, file.path());
        let err = fetcher.list_page(Cursor::START, 5).await.unwrap_err();
        assert!(matches!(err, FetchError::Fixture(_)));
    }
}
