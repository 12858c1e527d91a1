use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use dealscan_adapters::FetcherSettings;
use dealscan_core::Source;
use serde::Deserialize;
use tokio::fs;

pub const DEFAULT_CHUNK_SIZE: u64 = 25;
pub const DEFAULT_MAX_DURATION_SECS: u64 = 300;
pub const DEFAULT_SCAN_CRON: &str = "0 0 */6 * * *";

#[derive(Clone)]
pub struct ScanConfig {
    pub database_url: Option<String>,
    pub chunk_size: u64,
    pub max_duration: Duration,
    pub public_url: String,
    pub cron_secret: Option<String>,
    pub internal_secret: Option<String>,
    pub admin_sessions: Vec<String>,
    pub scheduler_enabled: bool,
    pub scan_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub web_port: u16,
    pub workspace_root: PathBuf,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_duration: Duration::from_secs(DEFAULT_MAX_DURATION_SECS),
            public_url: "http://127.0.0.1:8000".to_string(),
            cron_secret: None,
            internal_secret: None,
            admin_sessions: Vec::new(),
            scheduler_enabled: false,
            scan_cron: DEFAULT_SCAN_CRON.to_string(),
            user_agent: "dealscan-bot/0.1".to_string(),
            http_timeout_secs: 20,
            web_port: 8000,
            workspace_root: PathBuf::from("."),
        }
    }
}

impl ScanConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparseable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            database_url: non_empty("DATABASE_URL"),
            chunk_size: non_empty("DEALSCAN_CHUNK_SIZE")
                .and_then(|v| v.parse::<u64>().ok())
                .map(|v| v.max(1))
                .unwrap_or(defaults.chunk_size),
            max_duration: non_empty("DEALSCAN_MAX_DURATION_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_duration),
            public_url: non_empty("DEALSCAN_PUBLIC_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_url),
            cron_secret: non_empty("DEALSCAN_CRON_SECRET"),
            internal_secret: non_empty("DEALSCAN_INTERNAL_SECRET"),
            admin_sessions: non_empty("DEALSCAN_ADMIN_SESSIONS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            scheduler_enabled: non_empty("DEALSCAN_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.scheduler_enabled),
            scan_cron: non_empty("DEALSCAN_SCAN_CRON").unwrap_or(defaults.scan_cron),
            user_agent: non_empty("DEALSCAN_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: non_empty("DEALSCAN_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            web_port: non_empty("DEALSCAN_WEB_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.web_port),
            workspace_root: non_empty("DEALSCAN_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
        }
    }

    pub fn has_shared_secret(&self) -> bool {
        self.cron_secret.is_some() || self.internal_secret.is_some()
    }
}

fn redacted(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "<redacted>"
    } else {
        "<unset>"
    }
}

impl fmt::Debug for ScanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanConfig")
            .field("database_url", &redacted(&self.database_url))
            .field("chunk_size", &self.chunk_size)
            .field("max_duration", &self.max_duration)
            .field("public_url", &self.public_url)
            .field("cron_secret", &redacted(&self.cron_secret))
            .field("internal_secret", &redacted(&self.internal_secret))
            .field("admin_sessions", &self.admin_sessions.len())
            .field("scheduler_enabled", &self.scheduler_enabled)
            .field("scan_cron", &self.scan_cron)
            .field("user_agent", &self.user_agent)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("web_port", &self.web_port)
            .field("workspace_root", &self.workspace_root)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source: Source,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub fetcher: FetcherSettings,
    #[serde(default)]
    pub notes: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceRegistry {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let registry: SourceRegistry = serde_yaml::from_str(text).context("parsing source registry")?;
        let mut seen = HashSet::new();
        for entry in &registry.sources {
            if !seen.insert(entry.source) {
                anyhow::bail!("source {} is listed more than once", entry.source);
            }
        }
        Ok(registry)
    }

    pub async fn load(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join("sources.yaml");
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn get(&self, source: Source) -> Option<&SourceConfig> {
        self.sources.iter().find(|entry| entry.source == source)
    }

    /// Enabled sources in sweep order, regardless of their order in the file.
    pub fn sweep_sequence(&self) -> Vec<Source> {
        Source::SWEEP_ORDER
            .into_iter()
            .filter(|source| self.get(*source).is_some_and(|entry| entry.enabled))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_overrides_and_defaults() {
        let env = HashMap::from([
            ("DEALSCAN_CHUNK_SIZE", "0"),
            ("DEALSCAN_PUBLIC_URL", "https://scan.example/"),
            ("DEALSCAN_INTERNAL_SECRET", "s3cret"),
            ("DEALSCAN_CRON_SECRET", "   "),
            ("DEALSCAN_ADMIN_SESSIONS", "abc, ,def"),
            ("DEALSCAN_HTTP_TIMEOUT_SECS", "soon"),
        ]);
        let config = ScanConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.chunk_size, 1);
        assert_eq!(config.public_url, "https://scan.example");
        assert_eq!(config.internal_secret.as_deref(), Some("s3cret"));
        assert!(config.cron_secret.is_none());
        assert_eq!(config.admin_sessions, vec!["abc", "def"]);
        assert_eq!(config.http_timeout_secs, 20);
        assert_eq!(config.max_duration, Duration::from_secs(300));
        assert_eq!(config.scan_cron, DEFAULT_SCAN_CRON);
        assert!(config.has_shared_secret());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = ScanConfig {
            internal_secret: Some("s3cret".into()),
            database_url: Some("postgres://user:pw@db/dealscan".into()),
            admin_sessions: vec!["session-token".into()],
            ..ScanConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("pw@db"));
        assert!(!rendered.contains("session-token"));
    }

    #[test]
    fn sweep_sequence_follows_fixed_order_and_skips_disabled() {
        let registry = SourceRegistry::from_yaml_str(
            r#"
sources:
  - source: partner
    fetcher: { kind: fixture, path: fixtures/partner/items.json }
  - source: citybuys
    enabled: false
    fetcher: { kind: fixture, path: fixtures/citybuys/items.json }
  - source: dealpulse
    fetcher: { kind: html_listing, listing_url: "https://dealpulse.example/deals" }
"#,
        )
        .unwrap();
        assert_eq!(
            registry.sweep_sequence(),
            vec![Source::Dealpulse, Source::Partner]
        );
    }

    #[test]
    fn duplicate_sources_are_rejected() {
        let err = SourceRegistry::from_yaml_str(
            r#"
sources:
  - source: partner
    fetcher: { kind: fixture, path: a.json }
  - source: partner
    fetcher: { kind: fixture, path: b.json }
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[tokio::test]
    async fn registry_load_names_the_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SourceRegistry::load(dir.path()).await.unwrap_err();
        assert!(format!("{err:#}").contains("sources.yaml"));

        std::fs::write(
            dir.path().join("sources.yaml"),
            "sources:\n  - source: citybuys\n    fetcher: { kind: fixture, path: cb.json }\n",
        )
        .unwrap();
        let registry = SourceRegistry::load(dir.path()).await.unwrap();
        assert_eq!(registry.sweep_sequence(), vec![Source::Citybuys]);
    }

    #[tokio::test]
    async fn shipped_registry_loads() {
        let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..");
        let registry = SourceRegistry::load(&root).await.unwrap();
        assert_eq!(registry.sweep_sequence(), Source::SWEEP_ORDER.to_vec());
    }
}
