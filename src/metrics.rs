use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::env;
use std::fs;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::MetricsConfig;
use crate::dispatch::{LegOutcome, ResponseClass};

/// Seconds. Shared by both duration histograms.
pub const DURATION_BUCKETS: [f64; 6] = [0.1, 0.5, 1.0, 5.0, 10.0, 100.0];

/// Score label used when the API answered without a body.
const NO_SCORE: &str = "0.0";

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("Push gateway URL '{url}': {reason}")]
    Url { url: String, reason: String },
    #[error("Push failed: {0}")]
    Push(String),
}

// --- Run Metrics ---

/// Metric families for one run, on a private registry so the push carries
/// nothing but this run's series.
pub struct RunMetrics {
    registry: Registry,
    hostname: String,
    service: String,
    txn_count: IntGaugeVec,
    pmnt_duration: HistogramVec,
    addpayee_duration: HistogramVec,
    err_pmnt: IntCounterVec,
    err_addpayee: IntCounterVec,
}

impl RunMetrics {
    pub fn new(hostname: impl Into<String>, service: impl Into<String>) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let txn_count = IntGaugeVec::new(
            Opts::new("txn_count", "The number of records discovered to be processed"),
            &["hostname", "service"],
        )?;
        let pmnt_duration = HistogramVec::new(
            HistogramOpts::new("fs_api_pmnt_duration_seconds", "Duration of payment API requests in seconds")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["hostname", "msg_type", "service", "participant", "direction", "payment_method", "score"],
        )?;
        let addpayee_duration = HistogramVec::new(
            HistogramOpts::new("fs_api_addpayee_duration_seconds", "Duration of addPayee API requests in seconds")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["hostname", "msg_type", "service", "participant", "direction", "score"],
        )?;
        let err_pmnt = IntCounterVec::new(
            Opts::new("fs_err_pmnt_processed_total", "Payment events the API did not accept"),
            &["hostname", "msg_type", "service", "participant", "direction", "payment_method"],
        )?;
        let err_addpayee = IntCounterVec::new(
            Opts::new("fs_err_addpayee_processed_total", "addPayee events the API did not accept"),
            &["hostname", "msg_type", "service", "participant", "direction"],
        )?;

        registry.register(Box::new(txn_count.clone()))?;
        registry.register(Box::new(pmnt_duration.clone()))?;
        registry.register(Box::new(addpayee_duration.clone()))?;
        registry.register(Box::new(err_pmnt.clone()))?;
        registry.register(Box::new(err_addpayee.clone()))?;

        Ok(Self {
            registry,
            hostname: hostname.into(),
            service: service.into(),
            txn_count,
            pmnt_duration,
            addpayee_duration,
            err_pmnt,
            err_addpayee,
        })
    }

    pub fn set_planned(&self, count: usize) {
        self.txn_count
            .with_label_values(&[self.hostname.as_str(), self.service.as_str()])
            .set(count as i64);
    }

    /// One observation per leg, chosen by response class and event type.
    pub fn record(&self, outcome: &LegOutcome) {
        let msg_type = outcome.event_type.as_str();
        let direction = outcome.direction.as_str();
        let participant = outcome.tenant_id.as_str();
        let payment_method = outcome.local_instrument.as_str();
        let is_payment = outcome.event_type.is_payment();
        let secs = outcome.elapsed.as_secs_f64();
        let host = self.hostname.as_str();
        let service = self.service.as_str();

        match outcome.class {
            ResponseClass::SuccessWithBody | ResponseClass::SuccessNoBody => {
                let score = match outcome.score {
                    Some(s) => format!("{}", s),
                    None => NO_SCORE.to_string(),
                };
                if is_payment {
                    self.pmnt_duration
                        .with_label_values(&[
                            host,
                            msg_type,
                            service,
                            participant,
                            direction,
                            payment_method,
                            score.as_str(),
                        ])
                        .observe(secs);
                } else {
                    self.addpayee_duration
                        .with_label_values(&[host, msg_type, service, participant, direction, score.as_str()])
                        .observe(secs);
                }
            }
            ResponseClass::Failure => {
                if is_payment {
                    self.err_pmnt
                        .with_label_values(&[
                            host,
                            msg_type,
                            service,
                            participant,
                            direction,
                            payment_method,
                        ])
                        .inc();
                } else {
                    self.err_addpayee
                        .with_label_values(&[host, msg_type, service, participant, direction])
                        .inc();
                }
            }
        }
    }

    /// Text exposition of every family in the run registry.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| MetricsError::Push(format!("exposition is not UTF-8: {}", e)))
    }
}

// --- Push Gateway ---

/// Pushes with "add" semantics (POST), leaving other series of the job alone.
pub struct PushGateway {
    client: Client,
    url: Url,
}

impl PushGateway {
    pub fn new(cfg: &MetricsConfig) -> Result<Self, MetricsError> {
        let url = push_url(&cfg.push_gateway, &cfg.job)?;
        Ok(Self {
            client: Client::new(),
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn push_add(&self, metrics: &RunMetrics) -> Result<(), MetricsError> {
        let body = metrics.encode()?;
        let resp = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, TextEncoder::new().format_type())
            .body(body)
            .send()
            .await
            .map_err(|e| MetricsError::Push(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(MetricsError::Push(format!("gateway answered {}: {}", status, text)));
        }
        debug!(url = %self.url, "Metrics pushed");
        Ok(())
    }
}

fn push_url(gateway: &str, job: &str) -> Result<Url, MetricsError> {
    let bad = |reason: String| MetricsError::Url {
        url: gateway.to_string(),
        reason,
    };
    let mut url = Url::parse(gateway).map_err(|e| bad(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| bad("cannot be a base URL".to_string()))?
        .pop_if_empty()
        .extend(["metrics", "job", job]);
    Ok(url)
}

/// Push after an update. Failures are logged and the run carries on.
pub async fn push_logged(gateway: &PushGateway, metrics: &RunMetrics) {
    if let Err(e) = gateway.push_add(metrics).await {
        warn!("Could not push metrics to {}: {}", gateway.url(), e);
    }
}

/// Hostname label: explicit override, then `$HOSTNAME`, then `/etc/hostname`.
pub fn resolve_hostname(configured: Option<&str>) -> String {
    if let Some(name) = configured.filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    if let Ok(name) = env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }
    fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ResponseEnvelope;
    use crate::model::{Direction, EventType};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn outcome(event_type: &str, class: ResponseClass, score: Option<f64>) -> LegOutcome {
        LegOutcome {
            direction: Direction::Inbound,
            event_type: EventType::from(event_type),
            tenant_id: "alpha".to_string(),
            local_instrument: "RTP".to_string(),
            class,
            score,
            elapsed: Duration::from_millis(250),
            envelope: ResponseEnvelope {
                transaction_id: "t".to_string(),
                event_id: "e".to_string(),
                event_type: event_type.to_string(),
                response_status: "200 OK".to_string(),
                response_headers: BTreeMap::new(),
                response_result: None,
                response_body: serde_json::Value::Null,
                process_time: Utc::now(),
            },
        }
    }

    #[test]
    fn test_payment_success_observes_scored_histogram() {
        let metrics = RunMetrics::new("host1", "rpp").unwrap();
        metrics.record(&outcome("paymentRT", ResponseClass::SuccessWithBody, Some(87.5)));

        let h = metrics
            .pmnt_duration
            .with_label_values(&["host1", "paymentRT", "rpp", "alpha", "inbound", "RTP", "87.5"]);
        assert_eq!(h.get_sample_count(), 1);
    }

    #[test]
    fn test_no_body_uses_zero_score() {
        let metrics = RunMetrics::new("host1", "EFT").unwrap();
        metrics.record(&outcome("paymentNRT", ResponseClass::SuccessNoBody, None));
        metrics.record(&outcome("addPayeeNRT", ResponseClass::SuccessNoBody, None));

        let pmnt = metrics
            .pmnt_duration
            .with_label_values(&["host1", "paymentNRT", "EFT", "alpha", "inbound", "RTP", "0.0"]);
        assert_eq!(pmnt.get_sample_count(), 1);
        let payee = metrics
            .addpayee_duration
            .with_label_values(&["host1", "addPayeeNRT", "EFT", "alpha", "inbound", "0.0"]);
        assert_eq!(payee.get_sample_count(), 1);
    }

    #[test]
    fn test_failures_count_per_family() {
        let metrics = RunMetrics::new("host1", "rpp").unwrap();
        metrics.record(&outcome("paymentRT", ResponseClass::Failure, None));
        metrics.record(&outcome("paymentRT", ResponseClass::Failure, None));
        metrics.record(&outcome("addPayeeRT", ResponseClass::Failure, None));

        let pmnt = metrics
            .err_pmnt
            .with_label_values(&["host1", "paymentRT", "rpp", "alpha", "inbound", "RTP"]);
        assert_eq!(pmnt.get(), 2);
        let payee = metrics
            .err_addpayee
            .with_label_values(&["host1", "addPayeeRT", "rpp", "alpha", "inbound"]);
        assert_eq!(payee.get(), 1);
    }

    #[test]
    fn test_exposition_contains_families() {
        let metrics = RunMetrics::new("host1", "rpp").unwrap();
        metrics.set_planned(25);
        metrics.record(&outcome("paymentRT", ResponseClass::SuccessWithBody, Some(0.0)));

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"txn_count{hostname="host1",service="rpp"} 25"#));
        assert!(text.contains("fs_api_pmnt_duration_seconds_bucket"));
        assert!(text.contains(r#"score="0""#));
    }

    #[test]
    fn test_push_url() {
        let url = push_url("http://gateway:9091", "pushgateway").unwrap();
        assert_eq!(url.as_str(), "http://gateway:9091/metrics/job/pushgateway");
        let url = push_url("http://gateway:9091/", "load gen").unwrap();
        assert_eq!(url.as_str(), "http://gateway:9091/metrics/job/load%20gen");
        assert!(push_url("gateway:9091", "x").is_err());
    }

    #[test]
    fn test_hostname_override_wins() {
        assert_eq!(resolve_hostname(Some("box-7")), "box-7");
        assert!(!resolve_hostname(None).is_empty());
    }
}
