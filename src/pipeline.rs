use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::builder::{BuildError, TransactionBuilder};
use crate::config::{ConfigError, Settings};
use crate::context::RunContext;
use crate::dispatch::{Dispatcher, LegOutcome, ResponseClass};
use crate::metrics::{self, MetricsError, PushGateway, RunMetrics};
use crate::model::{Direction, EventFields, TransactionPair};
use crate::output::{OutputError, OutputSink};
use crate::scenario::{self, ScenarioError};
use crate::seed::{SeedCatalogue, SeedError};
use crate::transport::{EventPoster, HttpsPoster, TransportError};

/// Anything that ends the run early.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Seed(#[from] SeedError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Totals reported when the loop finishes.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub elapsed: Duration,
    pub records: usize,
    pub legs_posted: usize,
    pub failed_legs: usize,
}

impl RunSummary {
    pub fn transactions_per_sec(&self) -> f64 {
        rate(self.records, self.elapsed)
    }

    /// Two events per transaction.
    pub fn events_per_sec(&self) -> f64 {
        rate(self.records * 2, self.elapsed)
    }

    pub fn log(&self) {
        info!("Start                         : {}", self.started);
        info!("End                           : {}", self.finished);
        info!("Elapsed Time (Seconds)        : {:.3}", self.elapsed.as_secs_f64());
        info!("Records Processed             : {}", self.records);
        info!("Events Posted                 : {} ({} failed)", self.legs_posted, self.failed_legs);
        info!("Transactions/Second           : {:.2}", self.transactions_per_sec());
        info!("Events/Second                 : {:.2}", self.events_per_sec());
    }
}

fn rate(count: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

/// Builds the mTLS poster when API calls are enabled.
pub fn connect(settings: &Settings) -> Result<Option<Arc<dyn EventPoster>>, LoaderError> {
    if !settings.api.enabled {
        info!("API calls disabled, payloads will not be posted");
        return Ok(None);
    }
    let poster: Arc<dyn EventPoster> = Arc::new(HttpsPoster::new(&settings.api)?);
    Ok(Some(poster))
}

/// The sequential record loop: build or load a pair, post it, meter it,
/// write it, pause, repeat.
pub struct Loader<'a> {
    settings: &'a Settings,
    seed: &'a SeedCatalogue,
    ctx: RunContext,
    dispatcher: Option<Dispatcher>,
    metrics: Option<RunMetrics>,
    gateway: Option<PushGateway>,
    output: Option<OutputSink>,
    pacing: StdRng,
}

impl<'a> Loader<'a> {
    pub fn new(
        settings: &'a Settings,
        seed: &'a SeedCatalogue,
        ctx: RunContext,
        poster: Option<Arc<dyn EventPoster>>,
    ) -> Result<Self, LoaderError> {
        let (metrics, gateway) = if settings.metrics.enabled {
            let hostname = metrics::resolve_hostname(settings.general.hostname.as_deref());
            let run_metrics = RunMetrics::new(hostname, settings.service_label())?;
            (Some(run_metrics), Some(PushGateway::new(&settings.metrics)?))
        } else {
            (None, None)
        };

        let output = if settings.output.enabled {
            let dir = settings
                .output
                .path
                .clone()
                .ok_or_else(|| ConfigError::Invalid("output.path is not set".to_string()))?;
            Some(OutputSink::new(dir)?)
        } else {
            None
        };

        Ok(Self {
            settings,
            seed,
            ctx,
            dispatcher: poster.map(Dispatcher::new),
            metrics,
            gateway,
            output,
            pacing: StdRng::from_entropy(),
        })
    }

    /// Run metrics, when enabled.
    pub fn metrics(&self) -> Option<&RunMetrics> {
        self.metrics.as_ref()
    }

    /// Echoes configuration and seed catalogue when asked to.
    pub fn echo_startup(&self) {
        let general = &self.settings.general;
        if general.echo_config {
            info!("Configuration: {:#?}", self.settings);
        }
        if general.echo_seed {
            match serde_json::to_string_pretty(self.seed) {
                Ok(json) => info!("Seed catalogue: {}", json),
                Err(e) => warn!("Cannot print seed catalogue: {}", e),
            }
        }
    }

    pub async fn run(&mut self) -> Result<RunSummary, LoaderError> {
        let started = Utc::now();
        let clock = Instant::now();

        let files = self.scenario_files()?;
        let planned = files
            .as_ref()
            .map_or(self.settings.generator.record_count, Vec::len);

        let source = if files.is_some() { "scenario files" } else { "generator" };
        info!(planned, source, mode = ?self.settings.generator.data_mode, "Run started");
        if let Some(m) = &self.metrics {
            m.set_planned(planned);
        }
        self.push_metrics().await;

        let settings = self.settings;
        let mut builder = TransactionBuilder::new(self.seed, &settings.generator, self.ctx.clone());

        let mut summary = RunSummary {
            started,
            finished: started,
            elapsed: Duration::ZERO,
            records: 0,
            legs_posted: 0,
            failed_legs: 0,
        };

        for idx in 0..planned {
            let seq = idx + 1;
            let pair = match &files {
                Some(paths) => scenario::load_transaction_from_file(&paths[idx], &self.ctx)?,
                None => builder.build_transaction()?,
            };
            info!(record = seq, of = planned, transaction_id = %pair.transaction_id(), "Record");
            self.echo_pair(&pair);

            if let Some(sink) = &self.output {
                for direction in [Direction::Inbound, Direction::Outbound] {
                    sink.write_payload(seq, pair.leg(direction))?;
                }
            }

            if let Some(dispatcher) = &self.dispatcher {
                let outcomes = dispatcher.dispatch(&pair).await?;
                for outcome in &outcomes {
                    summary.legs_posted += 1;
                    if outcome.class == ResponseClass::Failure {
                        summary.failed_legs += 1;
                    }
                    self.observe(outcome).await;
                }
                if let Some(sink) = &self.output {
                    for outcome in &outcomes {
                        sink.write_envelope(seq, &outcome.envelope)?;
                    }
                }
            }

            summary.records += 1;
            if seq < planned {
                self.pace().await;
            }
        }

        summary.finished = Utc::now();
        summary.elapsed = clock.elapsed();
        Ok(summary)
    }

    /// Scans and validates the input directory up front so a bad file stops
    /// the run before anything is posted.
    fn scenario_files(&self) -> Result<Option<Vec<PathBuf>>, LoaderError> {
        let input = &self.settings.input;
        if !input.enabled {
            return Ok(None);
        }
        let dir = input
            .path
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("input.path is not set".to_string()))?;

        let files = scenario::scan_input_dir(dir)?;
        info!(dir = %dir.display(), count = files.len(), "Scenario files found");
        scenario::validate_files(&files)?;
        Ok(Some(files))
    }

    fn echo_pair(&self, pair: &TransactionPair) {
        if !self.settings.general.echo_json {
            return;
        }
        for direction in pair.post_order() {
            let leg = pair.leg(direction);
            match serde_json::to_string_pretty(leg) {
                Ok(json) => debug!(event_id = %leg.event_id(), "{} payload: {}", direction, json),
                Err(e) => warn!("Cannot print {} payload: {}", direction, e),
            }
        }
    }

    async fn observe(&self, outcome: &LegOutcome) {
        if let Some(m) = &self.metrics {
            m.record(outcome);
        }
        self.push_metrics().await;
    }

    async fn push_metrics(&self) {
        if let (Some(m), Some(gateway)) = (&self.metrics, &self.gateway) {
            metrics::push_logged(gateway, m).await;
        }
    }

    /// Uniform pause in `[0, sleep_ms]` between records.
    async fn pace(&mut self) {
        let max = self.settings.generator.sleep_ms;
        if max == 0 {
            return;
        }
        let ms = self.pacing.gen_range(0..=max);
        debug!(sleep_ms = ms, "Pacing");
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates() {
        let summary = RunSummary {
            started: Utc::now(),
            finished: Utc::now(),
            elapsed: Duration::from_secs(4),
            records: 10,
            legs_posted: 20,
            failed_legs: 0,
        };
        assert_eq!(summary.transactions_per_sec(), 2.5);
        assert_eq!(summary.events_per_sec(), 5.0);
        assert_eq!(rate(10, Duration::ZERO), 0.0);
    }
}
