//! Run coordination: drives the pipeline stages strictly in order.
//!
//! The coordinator is the only owner of run-level state. Stage failures
//! split two ways: per-item failures are folded into the summary and the
//! run continues; infrastructure failures (store unreachable, no mailer)
//! abort the run with `RunStatus::Failed`; and a run always produces a
//! summary either way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Error;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{ContentGenerator, EmailDelivery, HolidayProvider, WeatherProvider};
use crate::config::CampaignConfig;
use crate::domain::{Reason, RunError, RunRequest, RunStage, RunStatus, RunSummary};
use crate::storage::Store;

use super::composer::Composer;
use super::context::{Clock, ContextCollector, SystemClock};
use super::dispatcher::Dispatcher;
use super::personalizer::render_all;
use super::run_log::{RunEvent, RunLog};
use super::targeting::TargetingEngine;

/// External collaborators the pipeline talks to. Optional collaborators
/// degrade: no weather provider means no weather context, no generator
/// means fallback templates. Delivery is required unless the run is dry.
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub weather: Option<Arc<dyn WeatherProvider>>,
    pub holidays: Option<Arc<dyn HolidayProvider>>,
    pub generator: Option<Arc<dyn ContentGenerator>>,
    pub mailer: Option<Arc<dyn EmailDelivery>>,
}

/// Owns the stages and executes campaign runs.
pub struct Coordinator {
    collector: ContextCollector,
    targeting: TargetingEngine,
    composer: Composer,
    dispatcher: Dispatcher,
    run_log: RunLog,
    clock: Arc<dyn Clock>,
    cancel: Arc<AtomicBool>,
}

impl Coordinator {
    pub fn new(collaborators: Collaborators, run_log: RunLog, config: CampaignConfig) -> Self {
        let collector =
            ContextCollector::new(collaborators.weather, collaborators.holidays, &config);
        let targeting = TargetingEngine::new(collaborators.store.clone(), config.clone());
        let composer = Composer::new(collaborators.generator, &config);
        let dispatcher = Dispatcher::new(collaborators.mailer, collaborators.store, &config);

        Self {
            collector,
            targeting,
            composer,
            dispatcher,
            run_log,
            clock: Arc::new(SystemClock),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the clock, fixing the reference date in tests. The same
    /// clock governs the context collector's cache expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.collector = self.collector.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    /// Handle for requesting cancellation. The flag is honored between
    /// dispatch batches; in-flight sends complete.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Execute one run per requested location, in order. A request without
    /// a location list executes exactly once.
    pub async fn run_many(&self, request: &RunRequest) -> Vec<RunSummary> {
        let Some(locations) = &request.locations else {
            return vec![self.run(request).await];
        };

        let mut summaries = Vec::with_capacity(locations.len());
        for location in locations {
            if self.cancel.load(Ordering::SeqCst) {
                warn!(location, "Cancelled before run started, stopping");
                break;
            }

            let sub_request = RunRequest {
                location: Some(location.clone()),
                trigger: request.trigger,
                locations: None,
                dry_run: request.dry_run,
            };
            summaries.push(self.run(&sub_request).await);
        }
        summaries
    }

    /// Execute one campaign run end to end. Always returns a summary; an
    /// infrastructure failure is reported as `RunStatus::Failed` rather
    /// than an error.
    #[instrument(skip(self, request), fields(run_id, trigger = %request.trigger))]
    pub async fn run(&self, request: &RunRequest) -> RunSummary {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", run_id.to_string().as_str());

        let started = Instant::now();
        let mut summary = RunSummary {
            run_id,
            status: RunStatus::Failed,
            trigger: request.trigger,
            location: request.location.clone(),
            total_targeted: 0,
            campaigns_created: 0,
            campaigns_sent: 0,
            campaigns_failed: 0,
            skipped: 0,
            errors: Vec::new(),
            started_at: self.clock.now(),
            elapsed_ms: 0,
            dry_run: request.dry_run,
        };

        info!(
            location = request.location.as_deref().unwrap_or("all"),
            dry_run = request.dry_run,
            "Starting campaign run"
        );

        // Stage 1: context (best-effort, never fails)
        self.log(RunEvent::stage(run_id, RunStage::CollectingContext))
            .await;
        let reference_date = self.clock.now().date_naive();
        let context = self
            .collector
            .collect(request.location.as_deref(), request.trigger, reference_date)
            .await;

        // Stage 2: targeting
        self.log(RunEvent::stage(run_id, RunStage::Targeting)).await;
        let targeting = match self.targeting.select(
            request.location.as_deref(),
            request.trigger,
            reference_date,
        ) {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(summary, started, RunStage::Targeting, e).await,
        };
        summary.total_targeted = targeting.targets.len();

        if targeting.targets.is_empty() {
            info!("No targets selected, run complete");
            summary.status = RunStatus::Success;
            summary.elapsed_ms = started.elapsed().as_millis() as u64;
            self.log(
                RunEvent::stage(run_id, RunStage::Complete).with_summary(summary.clone()),
            )
            .await;
            return summary;
        }

        // Stage 3: composing (one draft per distinct reason)
        self.log(
            RunEvent::stage(run_id, RunStage::Composing).with_detail(json!({
                "targets": targeting.targets.len(),
                "suppressed": targeting.suppressed,
            })),
        )
        .await;
        let reasons = distinct_reasons(&targeting.targets);
        let drafts = self.composer.compose(&reasons, &context).await;

        // Stage 4: personalizing
        self.log(RunEvent::stage(run_id, RunStage::Personalizing))
            .await;
        let personalized = render_all(run_id, &drafts, &targeting.targets, &context);
        summary.campaigns_created = personalized.campaigns.len();
        summary.skipped = personalized.skipped.len();
        summary.errors.extend(personalized.skipped);

        // Stage 5: dispatching
        self.log(
            RunEvent::stage(run_id, RunStage::Dispatching).with_detail(json!({
                "campaigns": summary.campaigns_created,
            })),
        )
        .await;
        let dispatched = match self
            .dispatcher
            .dispatch(personalized.campaigns, request.dry_run, self.cancel.clone())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(summary, started, RunStage::Dispatching, e).await,
        };
        summary.campaigns_sent = dispatched.sent;
        summary.campaigns_failed = dispatched.failed;
        summary.errors.extend(dispatched.errors);

        summary.finalize_status();
        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            status = ?summary.status,
            sent = summary.campaigns_sent,
            failed = summary.campaigns_failed,
            skipped = summary.skipped,
            elapsed_ms = summary.elapsed_ms,
            "Campaign run complete"
        );
        self.log(RunEvent::stage(run_id, RunStage::Complete).with_summary(summary.clone()))
            .await;

        summary
    }

    /// Retrieve a run's final summary from its log.
    pub async fn run_summary(&self, run_id: Uuid) -> anyhow::Result<Option<RunSummary>> {
        self.run_log.summary(run_id).await
    }

    async fn fail(
        &self,
        mut summary: RunSummary,
        started: Instant,
        stage: RunStage,
        error: Error,
    ) -> RunSummary {
        warn!(stage = %stage, error = %error, "Run aborted by infrastructure failure");

        summary.status = RunStatus::Failed;
        summary
            .errors
            .push(RunError::new(stage, None, format!("{:#}", error)));
        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        self.log(RunEvent::stage(summary.run_id, RunStage::Failed).with_summary(summary.clone()))
            .await;
        summary
    }

    /// Run log writes never abort a run; a failed append is logged and
    /// dropped.
    async fn log(&self, event: RunEvent) {
        if let Err(e) = self.run_log.append(&event).await {
            warn!(error = %e, "Failed to append run event");
        }
    }
}

/// Distinct reasons across targets, preserving first-seen order.
fn distinct_reasons(targets: &[super::targeting::Target]) -> Vec<Reason> {
    let mut reasons = Vec::new();
    for target in targets {
        if !reasons.contains(&target.reason) {
            reasons.push(target.reason);
        }
    }
    reasons
}
