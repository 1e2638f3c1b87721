use crate::error::Result;
use crate::models::{FieldTable, RawRecord, Snapshot};
use std::collections::HashSet;
use std::io::Read;
use tracing::{debug, warn};

const DELIMITER: u8 = b';';
const UTF8_BOM: char = '\u{feff}';

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub rows: usize,
    pub matches: usize,
}

pub struct RecordMapper;

impl RecordMapper {
    /// Find the station and map its row onto the field table in one pass
    pub fn map_station<R: Read>(
        input: R,
        station_column: &str,
        station_id: &str,
        table: &FieldTable,
    ) -> Result<(Snapshot, ScanStats)> {
        let (record, stats) = Self::select_record(input, station_column, station_id)?;
        Ok((Self::build_snapshot(&record, table), stats))
    }

    /// Scan every row and keep the one whose station column equals `station_id`.
    ///
    /// If the station appears more than once the last row wins. If it does not
    /// appear at all the returned record is empty.
    pub fn select_record<R: Read>(
        input: R,
        station_column: &str,
        station_id: &str,
    ) -> Result<(RawRecord, ScanStats)> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(DELIMITER)
            .flexible(true)
            .from_reader(input);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, label)| {
                if i == 0 {
                    label.trim_start_matches(UTF8_BOM).to_string()
                } else {
                    label.to_string()
                }
            })
            .collect();

        let mut seen = HashSet::new();
        for label in &headers {
            if !seen.insert(label.as_str()) {
                warn!(
                    "Column '{}' appears more than once in feed header, using the last one",
                    label
                );
            }
        }

        let mut stats = ScanStats::default();

        let Some(station_idx) = headers.iter().rposition(|label| label == station_column) else {
            warn!(
                "Station column '{}' not found in feed header ({} columns)",
                station_column,
                headers.len()
            );
            return Ok((RawRecord::default(), stats));
        };

        let mut selected = None;
        for row in reader.records() {
            let row = row?;
            stats.rows += 1;

            if row.get(station_idx) == Some(station_id) {
                stats.matches += 1;
                selected = Some(row);
            }
        }

        if stats.matches > 1 {
            warn!(
                "Station {} appears {} times in feed, using the last row",
                station_id, stats.matches
            );
        }

        let record = match selected {
            Some(row) => RawRecord::new(
                headers
                    .iter()
                    .zip(row.iter())
                    .map(|(label, value)| (label.clone(), value.to_string()))
                    .collect(),
            ),
            None => {
                warn!(
                    "Station {} not found in feed ({} rows scanned)",
                    station_id, stats.rows
                );
                RawRecord::default()
            }
        };

        Ok((record, stats))
    }

    /// Copy the record's values into a snapshot keyed by field key.
    ///
    /// Excluded keys are skipped before any column lookup. Columns missing from
    /// the record, and blank values, are left out of the snapshot.
    pub fn build_snapshot(record: &RawRecord, table: &FieldTable) -> Snapshot {
        let mut snapshot = Snapshot::new();
        if record.is_empty() {
            return snapshot;
        }

        for descriptor in table.publishable() {
            match record.get(&descriptor.column) {
                Some(value) if !value.trim().is_empty() => {
                    snapshot.insert(&descriptor.field, value);
                }
                Some(_) => {
                    debug!("Field {} has no value in feed row", descriptor.field);
                }
                None => {
                    debug!(
                        "Column '{}' for field {} not present in feed",
                        descriptor.column, descriptor.field
                    );
                }
            }
        }

        snapshot
    }
}
