use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::LabError;

pub const UNKNOWN_LABEL: &str = "Unknown";
pub const NO_MATCHES: &str = "No matches";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatientId(i64);

impl PatientId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PatientId {
    type Err = LabError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_row_id(value)
            .map(Self)
            .ok_or_else(|| LabError::InvalidPatientId(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TechnicianId(i64);

impl TechnicianId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TechnicianId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TechnicianId {
    type Err = LabError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_row_id(value)
            .map(Self)
            .ok_or_else(|| LabError::InvalidTechnicianId(value.to_string()))
    }
}

fn parse_row_id(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok().filter(|id| *id > 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "Otro")]
    Other,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
            Gender::Other => "Otro",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = LabError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "M" => Ok(Gender::Male),
            "F" => Ok(Gender::Female),
            "Otro" => Ok(Gender::Other),
            _ => Err(LabError::InvalidGender(value.to_string())),
        }
    }
}

/// One accepted row of an uploaded marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerObservation {
    #[serde(rename = "gen")]
    pub gene: String,
    #[serde(rename = "nucleotido")]
    pub nucleotide: String,
    #[serde(rename = "posicion")]
    pub position: i64,
    #[serde(rename = "mutacion")]
    pub is_mutated: bool,
    #[serde(rename = "tipo_mutacion")]
    pub mutation_type: String,
    #[serde(rename = "efecto")]
    pub effect: String,
}

/// Outcome of matching an ingestion against the disease catalog.
///
/// `NoMatches` is kept distinct from an empty name list so it can never be
/// rendered as an empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiseaseSummary {
    Detected(Vec<String>),
    NoMatches,
}

impl DiseaseSummary {
    pub fn from_names(names: Vec<String>) -> Self {
        if names.is_empty() {
            DiseaseSummary::NoMatches
        } else {
            DiseaseSummary::Detected(names)
        }
    }

    pub fn names(&self) -> &[String] {
        match self {
            DiseaseSummary::Detected(names) => names,
            DiseaseSummary::NoMatches => &[],
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, DiseaseSummary::Detected(_))
    }
}

impl fmt::Display for DiseaseSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiseaseSummary::Detected(names) => f.write_str(&names.join(", ")),
            DiseaseSummary::NoMatches => f.write_str(NO_MATCHES),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiseaseEntry {
    pub id: i64,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "descripcion")]
    pub description: String,
    #[serde(rename = "mutaciones_asociadas")]
    pub associated_genes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: i64,
    #[serde(rename = "paciente_id")]
    pub patient_id: PatientId,
    #[serde(rename = "nombre_archivo")]
    pub source_file_name: String,
    #[serde(rename = "fecha_subida")]
    pub uploaded_at: DateTime<Utc>,
    #[serde(rename = "enfermedad_detectada")]
    pub detected_diseases: Option<String>,
    #[serde(rename = "relevancia_clinica")]
    pub clinical_relevance: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    #[serde(rename = "nombre")]
    pub first_name: String,
    #[serde(rename = "apellido")]
    pub last_name: String,
    #[serde(rename = "edad")]
    pub age: u32,
    #[serde(rename = "genero")]
    pub gender: Gender,
    #[serde(rename = "laboratorista_id")]
    pub technician_id: TechnicianId,
}

#[derive(Debug, Clone)]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    pub age: u32,
    pub gender: Gender,
    pub technician_id: TechnicianId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabTechnician {
    pub id: TechnicianId,
    #[serde(rename = "nombre")]
    pub first_name: String,
    #[serde(rename = "apellido")]
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(rename = "telefono")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTechnician {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub phone: Option<String>,
}

/// Hex SHA-256 of the password, salted with the normalized email.
pub fn password_digest(email: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.trim().to_lowercase().as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
