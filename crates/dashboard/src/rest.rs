//! REST adapter: one GET per metric against `{base}/dummy/status/{metric}`.
//! No retry and no timeout; each fetch stands alone, so one bad metric never
//! holds up the others.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::error::RestError;
use crate::reconciler::Reconciler;
use crate::state::{Metric, Samples};

#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

/// A bare host gets `http://` in front, the way the dashboard built its
/// URLs from `BASE_URL`. Trailing slashes are dropped.
pub fn normalize_base_url(raw: &str) -> String {
    let s = raw.trim().trim_end_matches('/');
    if s.starts_with("http://") || s.starts_with("https://") {
        s.to_string()
    } else {
        format!("http://{s}")
    }
}

impl RestClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: normalize_base_url(base_url),
        }
    }

    pub fn metric_url(&self, metric: Metric) -> String {
        format!("{}/dummy/status/{}", self.base_url, metric.path_key())
    }

    pub async fn fetch(&self, metric: Metric) -> Result<Samples, RestError> {
        let resp = self.http.get(self.metric_url(metric)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RestError::Status(status));
        }
        Ok(resp.json::<Samples>().await?)
    }
}

/// Start one fetch task per metric. Each task writes its own result into the
/// reconciler when it lands. The tasks are not tied to the caller: if the
/// view unmounts meanwhile, the reconciler drops their results.
pub fn poll_once(client: &RestClient, reconciler: &Arc<Reconciler>) -> Vec<JoinHandle<()>> {
    Metric::ALL
        .into_iter()
        .map(|metric| {
            let client = client.clone();
            let reconciler = Arc::clone(reconciler);
            tokio::spawn(async move {
                let result = client.fetch(metric).await;
                if reconciler.apply_poll(metric, result).await {
                    debug!(metric = metric.path_key(), "metric updated");
                }
            })
        })
        .collect()
}

/// Poll at mount, then every `interval` if one is set. A tick is skipped
/// while any fetch of the previous round is still running. Aborting this
/// task stops the timer but leaves fetches already started to finish.
pub async fn run_poller(client: RestClient, reconciler: Arc<Reconciler>, interval: Option<Duration>) {
    let Some(every) = interval else {
        poll_once(&client, &reconciler);
        return;
    };

    info!(every_ms = every.as_millis() as u64, "metric poller started");
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
    loop {
        ticker.tick().await;
        if !reconciler.is_mounted() {
            break;
        }
        if in_flight.iter().any(|h| !h.is_finished()) {
            debug!("previous poll still running, tick skipped");
            continue;
        }
        in_flight = poll_once(&client, &reconciler);
    }
    debug!("metric poller stopped");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mqtt::{ChannelTable, Preset};
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    /// Serve a fake backend on an ephemeral port: temp_hum and prediction
    /// answer, tds fails with 500, illumination returns a non-array body, the
    /// rest are 404.
    async fn fake_backend() -> String {
        let app = Router::new()
            .route(
                "/dummy/status/temp_hum",
                get(|| async { Json(json!([{"temp": 21.5, "hum": 40}, {"temp": 22, "hum": 41}])) }),
            )
            .route(
                "/dummy/status/prediction",
                get(|| async { Json(json!([{"predicted": 3.2}])) }),
            )
            .route(
                "/dummy/status/tds",
                get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .route(
                "/dummy/status/illumination",
                get(|| async { Json(json!({"lux": 10})) }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Serve every metric as a one-sample series and count the requests.
    pub(crate) async fn counting_backend() -> (SocketAddr, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/dummy/status/{metric}",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!([{"n": 1}]))
                }),
            )
            .with_state(Arc::clone(&hits));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, hits)
    }

    /// Client that ignores proxy settings from the environment.
    pub(crate) fn local_client(base_url: &str) -> RestClient {
        RestClient {
            http: reqwest::Client::builder().no_proxy().build().unwrap(),
            base_url: normalize_base_url(base_url),
        }
    }

    fn reconciler() -> Arc<Reconciler> {
        Arc::new(Reconciler::new(Arc::new(ChannelTable::preset(Preset::SmartFarm))))
    }

    async fn join_all(handles: Vec<JoinHandle<()>>) {
        for h in handles {
            h.await.unwrap();
        }
    }

    // -- RestClient ---------------------------------------------------------

    #[test]
    fn metric_url_uses_path_key() {
        let c = RestClient::new("http://13.209.126.231/");
        assert_eq!(
            c.metric_url(Metric::LiquidTemp),
            "http://13.209.126.231/dummy/status/liquid_temp"
        );
    }

    #[test]
    fn bare_host_gets_http_scheme() {
        assert_eq!(normalize_base_url("13.209.126.231"), "http://13.209.126.231");
        assert_eq!(normalize_base_url("https://farm.io/"), "https://farm.io");
        assert_eq!(normalize_base_url(" farm:8000/ "), "http://farm:8000");
        assert_eq!(
            RestClient::new("127.0.0.1:8000").metric_url(Metric::Tds),
            "http://127.0.0.1:8000/dummy/status/tds"
        );
    }

    #[tokio::test]
    async fn fetch_returns_samples_unmodified() {
        let c = local_client(&fake_backend().await);
        let samples = c.fetch(Metric::TempHum).await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], json!({"temp": 21.5, "hum": 40}));
    }

    #[tokio::test]
    async fn fetch_non_success_is_status_error() {
        let c = local_client(&fake_backend().await);
        let err = c.fetch(Metric::Tds).await.unwrap_err();
        assert!(matches!(err, RestError::Status(s) if s == reqwest::StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn fetch_non_array_body_is_request_error() {
        let c = local_client(&fake_backend().await);
        assert!(matches!(
            c.fetch(Metric::Illumination).await,
            Err(RestError::Request(_))
        ));
    }

    // -- poll_once ----------------------------------------------------------

    #[tokio::test]
    async fn one_failing_metric_does_not_block_others() {
        let c = local_client(&fake_backend().await);
        let r = reconciler();
        join_all(poll_once(&c, &r)).await;

        let m = r.snapshot().await.metrics;
        assert_eq!(m.temp_hum.as_ref().map(Vec::len), Some(2));
        assert_eq!(m.prediction.as_ref().map(Vec::len), Some(1));
        assert!(m.tds.is_none());
        assert!(m.illumination.is_none());
        assert!(m.water_level.is_none());
        assert!(!m.is_loaded());
    }

    #[tokio::test]
    async fn poll_after_unmount_writes_nothing() {
        let c = local_client(&fake_backend().await);
        let r = reconciler();
        let handles = poll_once(&c, &r);
        r.unmount();
        join_all(handles).await;
        assert_eq!(r.snapshot().await.metrics, crate::state::Metrics::default());
    }

    #[tokio::test]
    async fn unreachable_backend_leaves_everything_loading() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let c = local_client(&format!("http://{addr}"));
        let r = reconciler();
        join_all(poll_once(&c, &r)).await;
        assert_eq!(r.snapshot().await.metrics.loading().len(), 6);
    }

    // -- run_poller ---------------------------------------------------------

    #[tokio::test]
    async fn poller_repolls_until_unmount() {
        let (addr, hits) = counting_backend().await;
        let r = reconciler();
        let poller = tokio::spawn(run_poller(
            local_client(&addr.to_string()),
            Arc::clone(&r),
            Some(Duration::from_millis(100)),
        ));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(hits.load(Ordering::SeqCst) >= 2 * Metric::ALL.len());
        assert!(r.snapshot().await.metrics.is_loaded());

        r.unmount();
        tokio::time::timeout(Duration::from_secs(1), poller)
            .await
            .expect("poller stops at the next tick")
            .unwrap();
        let settled = hits.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(hits.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn poller_skips_ticks_while_a_fetch_hangs() {
        let hung = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/dummy/status/temp_hum",
                get(|State(hung): State<Arc<AtomicUsize>>| async move {
                    hung.fetch_add(1, Ordering::SeqCst);
                    std::future::pending::<Json<Value>>().await
                }),
            )
            .route("/dummy/status/{metric}", get(|| async { Json(json!([])) }))
            .with_state(Arc::clone(&hung));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let r = reconciler();
        let poller = tokio::spawn(run_poller(
            local_client(&addr.to_string()),
            Arc::clone(&r),
            Some(Duration::from_millis(50)),
        ));
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(hung.load(Ordering::SeqCst), 1);
        assert_eq!(r.snapshot().await.metrics.loading(), vec![Metric::TempHum]);
        poller.abort();
    }
}
