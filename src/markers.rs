use std::collections::HashSet;
use std::fmt;
use std::io::Read;

use csv::{ByteRecordsIntoIter, ReaderBuilder, StringRecord};
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{MarkerObservation, UNKNOWN_LABEL};
use crate::error::LabError;

pub const COL_POSITION: &str = "posicion";
pub const COL_GENE: &str = "gen";
pub const COL_NUCLEOTIDE: &str = "nucleotido";
pub const COL_MUTATION: &str = "mutacion";
pub const COL_MUTATION_TYPE: &str = "tipo_mutacion";
pub const COL_EFFECT: &str = "efecto";

const AFFIRMATIVE_TOKENS: [&str; 2] = ["sí", "si"];

pub fn is_affirmative(normalized: &str) -> bool {
    AFFIRMATIVE_TOKENS.contains(&normalized)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingField(&'static str),
    NonNumericPosition(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingField(column) => write!(f, "missing field {column}"),
            SkipReason::NonNumericPosition(raw) => write!(f, "non-numeric position {raw:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// 1-based index of the data row, header excluded.
    pub line: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Accepted {
        observation: MarkerObservation,
        mutation_label: String,
    },
    Skipped(SkippedRow),
}

#[derive(Debug, Clone, Copy, Default)]
struct Columns {
    position: Option<usize>,
    gene: Option<usize>,
    nucleotide: Option<usize>,
    mutation: Option<usize>,
    mutation_type: Option<usize>,
    effect: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Self {
        let mut columns = Columns::default();
        for (index, name) in headers.iter().enumerate() {
            let slot = match name.trim() {
                COL_POSITION => &mut columns.position,
                COL_GENE => &mut columns.gene,
                COL_NUCLEOTIDE => &mut columns.nucleotide,
                COL_MUTATION => &mut columns.mutation,
                COL_MUTATION_TYPE => &mut columns.mutation_type,
                COL_EFFECT => &mut columns.effect,
                _ => continue,
            };
            slot.get_or_insert(index);
        }
        columns
    }
}

/// Single-pass reader turning a marker CSV into typed row outcomes.
///
/// Rows that fail validation come back as [`RowOutcome::Skipped`]; only
/// stream and framing failures surface as `Err`. Bytes that are not valid
/// UTF-8 are decoded lossily per row instead of failing the stream.
pub struct MarkerReader<R: Read> {
    records: ByteRecordsIntoIter<R>,
    columns: Columns,
    line: usize,
}

impl<R: Read> MarkerReader<R> {
    pub fn new(reader: R) -> Result<Self, LabError> {
        let mut csv = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let headers = csv
            .byte_headers()
            .map_err(|err| LabError::MarkerStream(err.to_string()))?
            .clone();
        let columns = Columns::from_headers(&StringRecord::from_byte_record_lossy(headers));
        debug!(?columns, "marker header resolved");
        Ok(Self {
            records: csv.into_byte_records(),
            columns,
            line: 0,
        })
    }

    fn decode(&self, record: &StringRecord) -> RowOutcome {
        self.try_decode(record).unwrap_or_else(|reason| {
            RowOutcome::Skipped(SkippedRow {
                line: self.line,
                reason,
            })
        })
    }

    fn try_decode(&self, record: &StringRecord) -> Result<RowOutcome, SkipReason> {
        let columns = &self.columns;
        let raw_position = required(record, columns.position, COL_POSITION)?;
        let gene = required(record, columns.gene, COL_GENE)?;
        let nucleotide = required(record, columns.nucleotide, COL_NUCLEOTIDE)?;
        let mutation = required(record, columns.mutation, COL_MUTATION)?;
        let position = parse_position(raw_position)
            .ok_or_else(|| SkipReason::NonNumericPosition(raw_position.to_string()))?;

        let mutation_label = mutation.to_lowercase();
        let observation = MarkerObservation {
            gene: gene.to_string(),
            nucleotide: nucleotide.to_string(),
            position,
            is_mutated: is_affirmative(&mutation_label),
            mutation_type: field(record, columns.mutation_type)
                .unwrap_or(UNKNOWN_LABEL)
                .to_string(),
            effect: field(record, columns.effect)
                .unwrap_or(UNKNOWN_LABEL)
                .to_string(),
        };
        Ok(RowOutcome::Accepted {
            observation,
            mutation_label,
        })
    }
}

fn field(record: &StringRecord, index: Option<usize>) -> Option<&str> {
    index
        .and_then(|index| record.get(index))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn required<'r>(
    record: &'r StringRecord,
    index: Option<usize>,
    name: &'static str,
) -> Result<&'r str, SkipReason> {
    field(record, index).ok_or(SkipReason::MissingField(name))
}

impl<R: Read> Iterator for MarkerReader<R> {
    type Item = Result<RowOutcome, LabError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        self.line += 1;
        Some(
            record
                .map(|record| self.decode(&StringRecord::from_byte_record_lossy(record)))
                .map_err(|err| LabError::MarkerStream(err.to_string())),
        )
    }
}

/// Accepts integral numbers only; "100" and "100.0" both map to 100.
pub fn parse_position(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(value);
    }
    let value = trimmed.parse::<f64>().ok()?;
    if !value.is_finite() || value.fract() != 0.0 {
        return None;
    }
    if value < i64::MIN as f64 || value >= i64::MAX as f64 {
        return None;
    }
    Some(value as i64)
}

/// Insertion-ordered set of strings, serialized as a plain list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OrderedSet {
    items: Vec<String>,
    #[serde(skip)]
    seen: HashSet<String>,
}

impl OrderedSet {
    pub fn insert(&mut self, value: &str) -> bool {
        if self.seen.contains(value) {
            return false;
        }
        self.seen.insert(value.to_string());
        self.items.push(value.to_string());
        true
    }

    pub fn as_slice(&self) -> &[String] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }
}

/// Everything one ingestion derives from its marker file.
#[derive(Debug, Clone, Default)]
pub struct MarkerBatch {
    pub observations: Vec<MarkerObservation>,
    pub mutated_genes: OrderedSet,
    pub mutation_labels: OrderedSet,
    pub nucleotides: OrderedSet,
    pub skipped: Vec<SkippedRow>,
}

impl MarkerBatch {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, LabError> {
        let mut batch = MarkerBatch::default();
        for outcome in MarkerReader::new(reader)? {
            batch.record(outcome?);
        }
        Ok(batch)
    }

    pub fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Accepted {
                observation,
                mutation_label,
            } => {
                if observation.is_mutated {
                    self.mutation_labels.insert(&mutation_label);
                    self.mutated_genes.insert(&observation.gene);
                }
                self.nucleotides.insert(&observation.nucleotide);
                self.observations.push(observation);
            }
            RowOutcome::Skipped(skipped) => {
                warn!(line = skipped.line, reason = %skipped.reason, "skipping marker row");
                self.skipped.push(skipped);
            }
        }
    }
}
