use std::time::Duration;

use dealscan_core::ScanPosition;
use dealscan_sync::{Continuation, ScanConfig};
use tracing::{debug, warn};

/// Self-invocation over HTTP: `GET {public_url}/scan?source=&cursor=&internal=true`
/// spawned on the runtime and never awaited by the caller. Delivery failures
/// are logged and dropped; the next scheduled sweep picks the source up again.
#[derive(Clone)]
pub struct HttpContinuation {
    client: reqwest::Client,
    base_url: String,
    bearer: Option<String>,
}

impl HttpContinuation {
    /// `bearer` is whichever shared secret `GET /scan` accepts for `internal=true`.
    pub fn new(base_url: impl Into<String>, bearer: Option<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if bearer.is_none() {
            warn!("no shared secret configured; continuation calls will be rejected");
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|err| {
                warn!(error = %err, "continuation client config rejected; using defaults");
                reqwest::Client::new()
            });
        Self {
            client,
            base_url,
            bearer,
        }
    }

    /// Signs with the internal secret, or the scheduler secret when that is the
    /// only one configured. Waits at most `max_duration` for the next step.
    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(
            config.public_url.clone(),
            config
                .internal_secret
                .clone()
                .or_else(|| config.cron_secret.clone()),
            config.max_duration,
        )
    }

    pub fn url_for(&self, next: ScanPosition) -> String {
        format!(
            "{}/scan?source={}&cursor={}&internal=true",
            self.base_url,
            next.source.as_str(),
            next.cursor.offset()
        )
    }

    /// The exact request `schedule` sends for `next`.
    pub fn request_for(&self, next: ScanPosition) -> reqwest::Result<reqwest::Request> {
        let mut request = self.client.get(self.url_for(next));
        if let Some(secret) = &self.bearer {
            request = request.bearer_auth(secret);
        }
        request.build()
    }
}

impl Continuation for HttpContinuation {
    fn schedule(&self, next: ScanPosition) {
        let url = self.url_for(next);
        let request = match self.request_for(next) {
            Ok(request) => request,
            Err(err) => {
                warn!(%url, error = %err, "continuation request invalid; dropping it");
                return;
            }
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%url, "no runtime to deliver continuation; dropping it");
            return;
        };
        let client = self.client.clone();
        runtime.spawn(async move {
            match client.execute(request).await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(%url, status = resp.status().as_u16(), "continuation delivered");
                }
                Ok(resp) => {
                    warn!(%url, status = resp.status().as_u16(), "continuation rejected");
                }
                Err(err) => {
                    warn!(%url, error = %err, "continuation delivery failed");
                }
            }
        });
    }
}
