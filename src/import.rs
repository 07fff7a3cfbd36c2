//! Scan-and-fill: recover Input Set values from label/value rows of an
//! exported sheet.

use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, info, warn};

use crate::error::{SlipError, SlipResult};
use crate::format::normalize_date;
use crate::ledger::{InputField, InputSet};

/// Column that holds the value in the printed slip layout
pub const VALUE_COLUMN: usize = 4;

/// Label aliases per input field, checked in order. `RATE` rows are left out
/// on purpose: in exported sheets they carry a cached amount, not the rate.
const FIELD_ALIASES: &[(InputField, &[&str])] = &[
    (InputField::MillerName, &["MILLER NAME"]),
    (InputField::PartyName, &["PARTY NAME"]),
    (InputField::BillNo, &["BILL NO"]),
    (InputField::ArrivalDate, &["ARRIVAL DT"]),
    (InputField::LorryHire, &["LORRY HIRE", "LORRY"]),
    (InputField::Discount, &["DISCOUNT"]),
    (InputField::SellerCommission, &["SELLER COM"]),
    (InputField::QtyDiff, &["Q-DIFF"]),
    (InputField::PaymentAmount, &["CHQ AM"]),
    (InputField::PaymentRef, &["CHQ NO"]),
    (InputField::PaymentDate, &["CHQ DT"]),
    (InputField::Bank, &["BANK"]),
];

/// Uppercased label -> value, last row for a label wins
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    entries: HashMap<String, String>,
}

impl LabelMap {
    pub fn scan<R, C>(rows: &[R]) -> Self
    where
        R: AsRef<[C]>,
        C: AsRef<str>,
    {
        let mut entries = HashMap::new();

        for row in rows {
            let cells = row.as_ref();
            let Some(label) = cells.first() else {
                continue;
            };
            let label = label.as_ref().trim();
            if label.is_empty() {
                continue;
            }

            let designated = cells
                .get(VALUE_COLUMN)
                .map(|c| c.as_ref().trim())
                .filter(|v| !v.is_empty());

            let value = designated.or_else(|| {
                cells
                    .iter()
                    .skip(1)
                    .map(|c| c.as_ref().trim())
                    .find(|v| !v.is_empty())
            });

            entries.insert(label.to_uppercase(), value.unwrap_or_default().to_string());
        }

        debug!("📋 Scanned {} labelled rows", entries.len());
        Self { entries }
    }

    /// First alias with a non-empty value
    pub fn get(&self, aliases: &[&str]) -> Option<&str> {
        aliases.iter().find_map(|alias| {
            self.entries
                .get(&alias.to_uppercase())
                .map(String::as_str)
                .filter(|v| !v.is_empty())
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Values recovered from a sheet, ready to apply to an Input Set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldAssignments {
    pub values: Vec<(InputField, String)>,
}

impl FieldAssignments {
    pub fn get(&self, field: InputField) -> Option<&str> {
        self.values
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overwrite matched fields; fields not found in the sheet keep their value
    pub fn apply_to(&self, inputs: &mut InputSet) {
        for (field, value) in &self.values {
            inputs.set(*field, value.clone());
        }
    }
}

/// Infer field assignments from label rows
pub fn scan_and_fill<R, C>(rows: &[R]) -> FieldAssignments
where
    R: AsRef<[C]>,
    C: AsRef<str>,
{
    let labels = LabelMap::scan(rows);
    let mut values = Vec::new();

    for (field, aliases) in FIELD_ALIASES {
        let Some(raw) = labels.get(aliases) else {
            continue;
        };

        if field.is_date() {
            match normalize_date(raw) {
                Some(iso) => values.push((*field, iso)),
                None => debug!("Skipping unreadable date for {}: {:?}", field, raw),
            }
        } else {
            values.push((*field, raw.to_string()));
        }
    }

    info!("📥 Imported {} fields from {} rows", values.len(), rows.len());
    FieldAssignments { values }
}

/// Read rows from delimited text. No header row; rows may be ragged.
/// Cells that are not valid UTF-8 (Windows-1252 exports) are decoded lossily.
pub fn read_rows<R: Read>(reader: R, delimiter: u8) -> SlipResult<Vec<Vec<String>>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(reader);

    let mut rows = Vec::new();
    let mut lossy = 0usize;
    for record in csv_reader.byte_records() {
        let record = record.map_err(|e| SlipError::import("could not read sheet", Some(e)))?;
        let row: Vec<String> = record
            .iter()
            .map(|field| match std::str::from_utf8(field) {
                Ok(text) => text.to_string(),
                Err(_) => {
                    lossy += 1;
                    String::from_utf8_lossy(field).into_owned()
                }
            })
            .collect();
        rows.push(row);
    }

    if lossy > 0 {
        warn!("⚠️ {} cells were not UTF-8 and were decoded lossily", lossy);
    }
    Ok(rows)
}
