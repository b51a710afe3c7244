//! CSV export for published setpoints.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::flow::ComponentSetPoint;

const HEADER: &str = "round,component_id,kind,sensor_id,demand,set_point";

/// One exported row: a setpoint together with the context it was computed in.
#[derive(Debug, Clone, PartialEq)]
pub struct SetPointRecord {
    pub round: u64,
    pub component_id: String,
    pub kind: String,
    pub sensor_id: String,
    pub demand: f64,
    pub set_point: f64,
}

impl SetPointRecord {
    /// Tags every row of one round with its round number.
    pub fn from_rows(round: u64, rows: &[ComponentSetPoint]) -> Vec<Self> {
        rows.iter()
            .map(|r| Self {
                round,
                component_id: r.component_id.clone(),
                kind: r.kind.to_string(),
                sensor_id: r.sensor_id.clone(),
                demand: r.demand,
                set_point: r.set_point,
            })
            .collect()
    }
}

/// Exports setpoint records to a CSV file at the given path.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_set_points_csv(records: &[SetPointRecord], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_set_points_csv(records, buf)
}

/// Writes setpoint records as CSV to any writer, in the order given.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_set_points_csv(records: &[SetPointRecord], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(HEADER.split(','))?;

    for r in records {
        wtr.write_record(&[
            r.round.to_string(),
            r.component_id.clone(),
            r.kind.clone(),
            r.sensor_id.clone(),
            format!("{:.4}", r.demand),
            format!("{:.4}", r.set_point),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
