use std::io::{self, Write};

use serde::Serialize;

use crate::domain::{AnalysisRecord, DiseaseEntry, LabTechnician};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_catalog(entries: &[DiseaseEntry]) -> io::Result<()> {
        Self::print_json(&entries)
    }

    pub fn print_disease(entry: &DiseaseEntry) -> io::Result<()> {
        Self::print_json(entry)
    }

    pub fn print_analyses(records: &[AnalysisRecord]) -> io::Result<()> {
        Self::print_json(&records)
    }

    pub fn print_technician(technician: &LabTechnician) -> io::Result<()> {
        Self::print_json(technician)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
