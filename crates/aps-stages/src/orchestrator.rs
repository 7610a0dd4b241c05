//! Phase Orchestrator
//!
//! One run: snapshot → (IOB ∥ Meal ∥ stale-autosens refresh) →
//! adjustment variables → Determine → validate/commit. IOB and Meal both
//! finish before Determine starts. Any failure aborts the run and surfaces
//! as a single [`DeterminationError`].
use crate::adjustment;
use crate::autosens::{parse_autosens, AutosensInputs, AutosensPhase};
use crate::commit::DeterminationCommitter;
use crate::determine::{DetermineInputs, DeterminePhase};
use crate::iob::{IobInputs, IobPhase};
use crate::meal::{MealInputs, MealPhase};
use crate::phase::{PhaseOutput, PhaseProof, PhaseRunner};
use crate::profile::{adjust_preferences, DefaultPreferencesPhase, ProfileInputs, ProfilePhase};
use aps_core::data_model::{AdjustmentVariables, Autosens, Determination, TempBasal};
use aps_core::pool::ContextPool;
use aps_core::script::ScriptResolver;
use aps_core::store::{names, RecordReader, RecordWriter, SettingsStore};
use aps_core::{ApsResult, DeterminationError, PipelineConfig, RunContext};
use aps_snapshot::{validate_glucose, ClinicalSnapshot, SnapshotAggregator};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// The three store seams the pipeline talks to.
#[derive(Clone)]
pub struct Stores {
    pub reader: Arc<dyn RecordReader>,
    pub writer: Arc<dyn RecordWriter>,
    pub settings: Arc<dyn SettingsStore>,
}

impl Stores {
    /// All three seams backed by one store.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: RecordReader + RecordWriter + SettingsStore + 'static,
    {
        Self {
            reader: store.clone(),
            writer: store.clone(),
            settings: store,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    pub trace_id: String,
    pub determination: Determination,
    pub committed: bool,
    /// Dynamic ISF was forced off for this run
    pub dynamic_isf_downgraded: bool,
    pub adjustment: AdjustmentVariables,
    pub proofs: Vec<PhaseProof>,
}

#[derive(Clone)]
pub struct DosingPipeline {
    aggregator: SnapshotAggregator,
    runner: PhaseRunner,
    committer: DeterminationCommitter,
    stores: Stores,
    config: PipelineConfig,
}

impl DosingPipeline {
    pub fn new(stores: Stores, scripts: ScriptResolver, pool: ContextPool, config: PipelineConfig) -> Self {
        Self {
            aggregator: SnapshotAggregator::new(stores.reader.clone(), stores.settings.clone(), config.clone()),
            runner: PhaseRunner::new(pool, scripts),
            committer: DeterminationCommitter::new(stores.writer.clone()),
            stores,
            config,
        }
    }

    pub fn pool(&self) -> &ContextPool {
        self.runner.pool()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// A scheduled run: validates glucose, commits the result.
    pub async fn determine(
        &self,
        as_of: DateTime<Utc>,
        current_temp: Option<TempBasal>,
    ) -> Result<PipelineOutcome, DeterminationError> {
        self.run(RunContext::scheduled(as_of), current_temp).await
    }

    /// A what-if run. Same phases, nothing is written.
    pub async fn simulate(
        &self,
        as_of: DateTime<Utc>,
        carbs: Option<f64>,
        bolus: Option<f64>,
        current_temp: Option<TempBasal>,
    ) -> Result<PipelineOutcome, DeterminationError> {
        self.run(RunContext::simulation(as_of, carbs, bolus), current_temp)
            .await
    }

    pub async fn run(
        &self,
        run: RunContext,
        current_temp: Option<TempBasal>,
    ) -> Result<PipelineOutcome, DeterminationError> {
        tracing::info!(trace_id = %run.trace_id, simulation = run.simulation, "{} determine basal started", run.label());
        match self.execute(&run, current_temp).await {
            Ok(outcome) => {
                tracing::info!(
                    trace_id = %run.trace_id,
                    committed = outcome.committed,
                    rate = ?outcome.determination.rate,
                    units = ?outcome.determination.units,
                    "{} determine basal finished",
                    run.label()
                );
                Ok(outcome)
            }
            Err(cause) => {
                tracing::error!(trace_id = %run.trace_id, error = %cause, "{} determine basal failed", run.label());
                Err(DeterminationError::from(cause))
            }
        }
    }

    async fn execute(&self, run: &RunContext, current_temp: Option<TempBasal>) -> ApsResult<PipelineOutcome> {
        let snapshot = self.aggregator.build_snapshot(run).await?;
        if !run.simulation {
            validate_glucose(&snapshot.glucose, run.as_of, &self.config)?;
        }

        let adjustment = adjustment::compute(&snapshot);
        let sufficient = adjustment::has_sufficient_tdd(&snapshot.tdd_history, run.as_of, &self.config);
        let (preferences, downgraded) =
            adjustment::guard_dynamic_sensitivity(&snapshot.settings.preferences, sufficient);
        if downgraded {
            tracing::warn!(
                trace_id = %run.trace_id,
                tdd_rows = snapshot.tdd_history.len(),
                required = self.config.tdd_required_rows(),
                "insufficient TDD for dynamic formula; disabling for this determine basal run"
            );
        }

        let prior_autosens = match &snapshot.autosens {
            Some(autosens) => serde_json::to_value(autosens)?,
            None => Value::Null,
        };
        let trace_id = run.trace_id.as_str();

        let iob_args = IobInputs {
            pump_history: snapshot.pump_history_json.clone(),
            profile: snapshot.settings.profile.clone(),
            clock: snapshot.clock(),
            autosens: prior_autosens.clone(),
        }
        .into_args();
        let meal_args = MealInputs {
            pump_history: snapshot.pump_history_json.clone(),
            profile: snapshot.settings.profile.clone(),
            clock: snapshot.clock(),
            glucose: snapshot.glucose_json.clone(),
            basal_profile: snapshot.settings.basal_profile.clone(),
            carbs: snapshot.carbs_json.clone(),
        }
        .into_args();

        let (iob, meal, refreshed) = tokio::try_join!(
            self.runner.run(&IobPhase, iob_args, trace_id),
            self.runner.run(&MealPhase, meal_args, trace_id),
            self.refresh_stale_autosens(&snapshot, run),
        )?;

        let adjustment_json = serde_json::to_value(&adjustment)?;
        if !run.simulation {
            self.stores.settings.save_settings(names::IOB, &iob.value).await?;
            self.stores
                .settings
                .save_settings(names::ADJUSTMENT_VARIABLES, &adjustment_json)
                .await?;
        }

        let current_temp = current_temp.unwrap_or_else(|| TempBasal::none(run.as_of));
        let determine_args = DetermineInputs {
            iob: iob.value.clone(),
            current_temp: serde_json::to_value(&current_temp)?,
            glucose: snapshot.glucose_json.clone(),
            profile: snapshot.settings.profile.clone(),
            autosens: prior_autosens,
            meal: meal.value.clone(),
            micro_bolus_allowed: true,
            reservoir: snapshot.settings.reservoir.clone(),
            clock: snapshot.clock(),
            pump_history: snapshot.pump_history_json.clone(),
            preferences: serde_json::to_value(&preferences)?,
            basal_profile: snapshot.settings.basal_profile.clone(),
            adjustment: adjustment_json,
        }
        .into_args();
        let determined = self.runner.run(&DeterminePhase, determine_args, trace_id).await?;
        tracing::debug!(trace_id, "{} raw determination: {}", run.label(), determined.value);

        let determination = self
            .committer
            .parse_and_commit(&determined.value, !run.simulation)
            .await?;

        let mut proofs = vec![iob.proof, meal.proof];
        proofs.extend(refreshed.map(|(_, proof)| proof));
        proofs.push(determined.proof);

        Ok(PipelineOutcome {
            trace_id: run.trace_id.clone(),
            determination,
            committed: !run.simulation,
            dynamic_isf_downgraded: downgraded,
            adjustment,
            proofs,
        })
    }

    /// Side pipeline: recomputes autosens when the stored one is stale. The
    /// fresh value only feeds later runs; output without a ratio leaves the
    /// stored value in place.
    async fn refresh_stale_autosens(
        &self,
        snapshot: &ClinicalSnapshot,
        run: &RunContext,
    ) -> ApsResult<Option<(Autosens, PhaseProof)>> {
        if run.simulation || self.is_fresh(snapshot.autosens.as_ref(), run.as_of) {
            return Ok(None);
        }
        let output = self.run_autosens(snapshot).await?;
        let autosens = match parse_autosens(output.value, snapshot.as_of) {
            Ok(autosens) => autosens,
            Err(err) => {
                tracing::warn!(trace_id = %snapshot.trace_id, error = %err, "autosens not refreshed");
                return Ok(None);
            }
        };
        tracing::info!(trace_id = %snapshot.trace_id, ratio = autosens.ratio, "autosens computed");
        self.stores.writer.commit_autosens(&autosens).await?;
        Ok(Some((autosens, output.proof)))
    }

    fn is_fresh(&self, autosens: Option<&Autosens>, as_of: DateTime<Utc>) -> bool {
        autosens
            .map(|a| a.is_fresh(as_of, self.config.autosens_max_age()))
            .unwrap_or(false)
    }

    async fn run_autosens(&self, snapshot: &ClinicalSnapshot) -> ApsResult<PhaseOutput> {
        let args = AutosensInputs {
            glucose: snapshot.glucose_json.clone(),
            pump_history: snapshot.pump_history_json.clone(),
            basal_profile: snapshot.settings.basal_profile.clone(),
            profile: snapshot.settings.profile.clone(),
            carbs: snapshot.carbs_json.clone(),
            temp_targets: snapshot.settings.temp_targets.clone(),
        }
        .into_args();
        self.runner.run(&AutosensPhase, args, &snapshot.trace_id).await
    }

    /// Returns the stored autosens when it is younger than the configured max
    /// age, otherwise recomputes and commits a fresh one.
    pub async fn ensure_autosens(&self, as_of: DateTime<Utc>) -> ApsResult<Autosens> {
        if let Some(stored) = self.stores.reader.latest_autosens().await? {
            if self.is_fresh(Some(&stored), as_of) {
                tracing::debug!(ratio = stored.ratio, "reusing stored autosens");
                return Ok(stored);
            }
        }
        let snapshot = self.aggregator.build_snapshot(&RunContext::scheduled(as_of)).await?;
        let output = self.run_autosens(&snapshot).await?;
        let autosens = parse_autosens(output.value, as_of)?;
        tracing::info!(trace_id = %snapshot.trace_id, ratio = autosens.ratio, "autosens computed");
        self.stores.writer.commit_autosens(&autosens).await?;
        Ok(autosens)
    }

    /// Builds the profile from current settings and stores it as both
    /// `profile` and `pump_profile`.
    pub async fn build_profiles(&self, as_of: DateTime<Utc>) -> ApsResult<Value> {
        let (settings, temp_target) = tokio::try_join!(
            self.aggregator.load_settings(),
            self.stores.reader.fetch_active_temp_target(as_of),
        )?;
        let preferences = adjust_preferences(&settings.preferences, temp_target.as_ref());
        let args = ProfileInputs {
            pump_settings: settings.pump_settings,
            bg_targets: settings.bg_targets,
            insulin_sensitivities: settings.insulin_sensitivities,
            basal_profile: settings.basal_profile,
            preferences: serde_json::to_value(&preferences)?,
            carb_ratios: settings.carb_ratios,
            temp_targets: settings.temp_targets,
            model: settings.model,
            app_settings: settings.app_settings,
        }
        .into_args();
        let trace_id = uuid::Uuid::new_v4().to_string();
        let output = self.runner.run(&ProfilePhase, args, &trace_id).await?;

        tokio::try_join!(
            self.stores.settings.save_settings(names::PUMP_PROFILE, &output.value),
            self.stores.settings.save_settings(names::PROFILE, &output.value),
        )?;
        tracing::info!(trace_id = %trace_id, "profiles rebuilt");
        Ok(output.value)
    }

    /// Default preferences as exported by the profile scripts.
    pub async fn export_defaults(&self) -> ApsResult<Value> {
        let trace_id = uuid::Uuid::new_v4().to_string();
        let output = self.runner.run(&DefaultPreferencesPhase, Vec::new(), &trace_id).await?;
        Ok(output.value)
    }

    /// The full scheduled cycle: profiles and autosens first, then a run.
    pub async fn cycle(
        &self,
        as_of: DateTime<Utc>,
        current_temp: Option<TempBasal>,
    ) -> Result<PipelineOutcome, DeterminationError> {
        tokio::try_join!(self.build_profiles(as_of), self.ensure_autosens(as_of))?;
        self.determine(as_of, current_temp).await
    }
}
