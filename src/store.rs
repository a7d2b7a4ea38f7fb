use std::sync::{Mutex, MutexGuard};

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use tracing::debug;

use crate::domain::{
    AnalysisRecord, DiseaseEntry, Gender, LabTechnician, NewPatient, NewTechnician, Patient,
    PatientId, TechnicianId,
};
use crate::error::LabError;

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;
CREATE TABLE IF NOT EXISTS laboratoristas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    nombre TEXT NOT NULL,
    apellido TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password TEXT NOT NULL,
    telefono TEXT
);
CREATE TABLE IF NOT EXISTS pacientes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    nombre TEXT NOT NULL,
    apellido TEXT NOT NULL,
    edad INTEGER NOT NULL,
    genero TEXT NOT NULL CHECK (genero IN ('M', 'F', 'Otro')),
    laboratorista_id INTEGER NOT NULL REFERENCES laboratoristas(id)
);
CREATE TABLE IF NOT EXISTS enfermedades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    nombre TEXT NOT NULL,
    descripcion TEXT NOT NULL,
    mutaciones_asociadas TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS analisis_adn (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    paciente_id INTEGER NOT NULL REFERENCES pacientes(id),
    nombre_archivo TEXT NOT NULL,
    fecha_subida TEXT NOT NULL,
    enfermedad_detectada TEXT,
    relevancia_clinica TEXT
);
";

/// Persistence used by the analysis pipeline.
pub trait RecordStore: Send + Sync {
    fn create_analysis(&self, patient_id: PatientId, file_name: &str) -> Result<i64, LabError>;
    fn update_analysis_detected_disease(&self, id: i64, summary: &str) -> Result<(), LabError>;
    fn list_disease_catalog(&self) -> Result<Vec<DiseaseEntry>, LabError>;
    fn list_analyses(&self) -> Result<Vec<AnalysisRecord>, LabError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Utf8Path) -> Result<Self, LabError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(|err| LabError::Filesystem(err.to_string()))?;
        }
        debug!(path = %path, "opening record store");
        Self::with_connection(Connection::open(path.as_std_path())?)
    }

    pub fn open_in_memory() -> Result<Self, LabError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, LabError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LabError> {
        self.conn
            .lock()
            .map_err(|_| LabError::Store("connection lock poisoned".to_string()))
    }

    pub fn add_disease(
        &self,
        name: &str,
        description: &str,
        associated_genes: &str,
    ) -> Result<DiseaseEntry, LabError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO enfermedades (nombre, descripcion, mutaciones_asociadas) VALUES (?1, ?2, ?3)",
            params![name, description, associated_genes],
        )?;
        Ok(DiseaseEntry {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            description: description.to_string(),
            associated_genes: associated_genes.to_string(),
        })
    }

    pub fn create_lab_technician(&self, new: NewTechnician) -> Result<LabTechnician, LabError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO laboratoristas (nombre, apellido, email, password, telefono) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.first_name,
                new.last_name,
                new.email,
                new.password_hash,
                new.phone
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                return Err(LabError::DuplicateEmail(new.email));
            }
            Err(err) => return Err(err.into()),
        }
        Ok(LabTechnician {
            id: TechnicianId::new(conn.last_insert_rowid()),
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            password_hash: new.password_hash,
            phone: new.phone,
        })
    }

    pub fn find_lab_technician(&self, id: TechnicianId) -> Result<Option<LabTechnician>, LabError> {
        let conn = self.conn()?;
        let technician = conn
            .query_row(
                "SELECT id, nombre, apellido, email, password, telefono FROM laboratoristas WHERE id = ?1",
                params![id.get()],
                |row| {
                    Ok(LabTechnician {
                        id: TechnicianId::new(row.get(0)?),
                        first_name: row.get(1)?,
                        last_name: row.get(2)?,
                        email: row.get(3)?,
                        password_hash: row.get(4)?,
                        phone: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(technician)
    }

    pub fn create_patient(&self, new: NewPatient) -> Result<Patient, LabError> {
        if self.find_lab_technician(new.technician_id)?.is_none() {
            return Err(LabError::TechnicianNotFound(new.technician_id.get()));
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pacientes (nombre, apellido, edad, genero, laboratorista_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.first_name,
                new.last_name,
                new.age,
                new.gender.as_str(),
                new.technician_id.get()
            ],
        )?;
        Ok(Patient {
            id: PatientId::new(conn.last_insert_rowid()),
            first_name: new.first_name,
            last_name: new.last_name,
            age: new.age,
            gender: new.gender,
            technician_id: new.technician_id,
        })
    }

    /// Looks a patient up, scoped to the technician that owns it.
    pub fn find_patient(
        &self,
        id: PatientId,
        technician_id: TechnicianId,
    ) -> Result<Option<Patient>, LabError> {
        let conn = self.conn()?;
        let patient = conn
            .query_row(
                "SELECT id, nombre, apellido, edad, genero, laboratorista_id FROM pacientes WHERE id = ?1 AND laboratorista_id = ?2",
                params![id.get(), technician_id.get()],
                patient_from_row,
            )
            .optional()?;
        Ok(patient)
    }

    pub fn list_patients_for(&self, technician_id: TechnicianId) -> Result<Vec<Patient>, LabError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, nombre, apellido, edad, genero, laboratorista_id FROM pacientes WHERE laboratorista_id = ?1 ORDER BY id",
        )?;
        let patients = stmt
            .query_map(params![technician_id.get()], patient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(patients)
    }
}

impl RecordStore for SqliteStore {
    fn create_analysis(&self, patient_id: PatientId, file_name: &str) -> Result<i64, LabError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO analisis_adn (paciente_id, nombre_archivo, fecha_subida) VALUES (?1, ?2, ?3)",
            params![patient_id.get(), file_name, Utc::now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_analysis_detected_disease(&self, id: i64, summary: &str) -> Result<(), LabError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE analisis_adn SET enfermedad_detectada = ?1 WHERE id = ?2",
            params![summary, id],
        )?;
        if updated == 0 {
            return Err(LabError::Store(format!("analysis {id} does not exist")));
        }
        Ok(())
    }

    fn list_disease_catalog(&self) -> Result<Vec<DiseaseEntry>, LabError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, nombre, descripcion, mutaciones_asociadas FROM enfermedades ORDER BY id",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(DiseaseEntry {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    associated_genes: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn list_analyses(&self) -> Result<Vec<AnalysisRecord>, LabError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, paciente_id, nombre_archivo, fecha_subida, enfermedad_detectada, relevancia_clinica FROM analisis_adn ORDER BY id",
        )?;
        let records = stmt
            .query_map([], |row| {
                Ok(AnalysisRecord {
                    id: row.get(0)?,
                    patient_id: PatientId::new(row.get(1)?),
                    source_file_name: row.get(2)?,
                    uploaded_at: row.get::<_, DateTime<Utc>>(3)?,
                    detected_diseases: row.get(4)?,
                    clinical_relevance: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    let gender: String = row.get(4)?;
    let gender = gender.parse::<Gender>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(Patient {
        id: PatientId::new(row.get(0)?),
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        age: row.get(3)?,
        gender,
        technician_id: TechnicianId::new(row.get(5)?),
    })
}
