use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::domain::{AnalysisRecord, DiseaseSummary, MarkerObservation, PatientId};
use crate::error::LabError;
use crate::markers::{MarkerBatch, OrderedSet};
use crate::matcher::match_diseases;
use crate::store::RecordStore;
use crate::uploads::{StagedUpload, TransientFiles};

pub const ANALYSIS_COMPLETE: &str = "Análisis completado";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    ResultRowCreated,
    Parsing,
    Matching,
    Persisted,
    Cleanup,
    Responded,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "Received",
            Stage::ResultRowCreated => "ResultRowCreated",
            Stage::Parsing => "Parsing",
            Stage::Matching => "Matching",
            Stage::Persisted => "Persisted",
            Stage::Cleanup => "Cleanup",
            Stage::Responded => "Responded",
            Stage::Failed => "Failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct StageEvent {
    pub stage: Stage,
    pub analysis_id: Option<i64>,
    pub elapsed: Duration,
}

pub trait StageSink {
    fn event(&self, event: StageEvent);
}

/// Reports every stage through `tracing`.
pub struct TracingSink;

impl StageSink for TracingSink {
    fn event(&self, event: StageEvent) {
        info!(
            stage = %event.stage,
            analysis_id = ?event.analysis_id,
            elapsed_ms = event.elapsed.as_millis() as u64,
            "analysis stage"
        );
    }
}

/// Response body of a completed ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    #[serde(rename = "mensaje")]
    pub message: String,
    #[serde(rename = "enfermedad_detectada")]
    pub detected_disease: String,
    #[serde(rename = "mutaciones_detectadas")]
    pub mutation_labels: OrderedSet,
    #[serde(rename = "nucleotidos_detectados")]
    pub nucleotides: OrderedSet,
    #[serde(rename = "secuenciaADN")]
    pub sequence: Vec<MarkerObservation>,
    #[serde(skip)]
    pub analysis_id: i64,
    #[serde(skip)]
    pub summary: DiseaseSummary,
    #[serde(skip)]
    pub skipped_rows: usize,
}

struct Progress<'a> {
    sink: &'a dyn StageSink,
    started: Instant,
    analysis_id: Option<i64>,
}

impl Progress<'_> {
    fn enter(&self, stage: Stage) {
        self.sink.event(StageEvent {
            stage,
            analysis_id: self.analysis_id,
            elapsed: self.started.elapsed(),
        });
    }
}

#[derive(Clone)]
pub struct App<S: RecordStore, F: TransientFiles> {
    store: S,
    files: F,
}

impl<S: RecordStore, F: TransientFiles> App<S, F> {
    pub fn new(store: S, files: F) -> Self {
        Self { store, files }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn files(&self) -> &F {
        &self.files
    }

    pub fn list_analyses(&self) -> Result<Vec<AnalysisRecord>, LabError> {
        self.store.list_analyses()
    }

    /// Runs one ingestion end to end. The staged file is deleted whatever the
    /// outcome; a failure after the result row exists leaves that row without
    /// a disease summary.
    pub fn analyze(
        &self,
        patient_id: PatientId,
        upload: StagedUpload,
        sink: &dyn StageSink,
    ) -> Result<AnalysisReport, LabError> {
        let mut progress = Progress {
            sink,
            started: Instant::now(),
            analysis_id: None,
        };
        progress.enter(Stage::Received);

        let outcome = self
            .store
            .create_analysis(patient_id, &upload.original_name)
            .and_then(|analysis_id| {
                progress.analysis_id = Some(analysis_id);
                progress.enter(Stage::ResultRowCreated);
                self.process(analysis_id, &upload, &progress)
            });

        progress.enter(Stage::Cleanup);
        if let Err(err) = self.files.delete(&upload) {
            warn!(path = %upload.path, error = %err, "failed to delete uploaded file");
        }

        match outcome {
            Ok(report) => {
                info!(
                    analysis_id = report.analysis_id,
                    patient_id = %patient_id,
                    diseases = %report.summary,
                    "analysis completed"
                );
                progress.enter(Stage::Responded);
                Ok(report)
            }
            Err(err) => {
                error!(patient_id = %patient_id, error = %err, "analysis failed");
                progress.enter(Stage::Failed);
                Err(err)
            }
        }
    }

    fn process(
        &self,
        analysis_id: i64,
        upload: &StagedUpload,
        progress: &Progress<'_>,
    ) -> Result<AnalysisReport, LabError> {
        progress.enter(Stage::Parsing);
        let batch = MarkerBatch::from_reader(self.files.open(upload)?)?;

        progress.enter(Stage::Matching);
        let catalog = self.store.list_disease_catalog()?;
        let summary = match_diseases(batch.mutated_genes.iter(), &catalog);
        let detected_disease = summary.to_string();

        self.store
            .update_analysis_detected_disease(analysis_id, &detected_disease)?;
        progress.enter(Stage::Persisted);

        Ok(AnalysisReport {
            message: ANALYSIS_COMPLETE.to_string(),
            detected_disease,
            mutation_labels: batch.mutation_labels,
            nucleotides: batch.nucleotides,
            sequence: batch.observations,
            analysis_id,
            summary,
            skipped_rows: batch.skipped.len(),
        })
    }
}
