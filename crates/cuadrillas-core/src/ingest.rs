//! Turns uploaded spreadsheet bytes into candidate task rows.

use cuadrillas_repository::TaskFields;

use crate::error::{CoreError, Result};

/// Canonical header names, with accepted alternative spellings.
const CONTRATISTA: &[&str] = &["Contratista"];
const OT: &[&str] = &["OT"];
const UT: &[&str] = &["UT"];
const DESC_OT: &[&str] = &["Descripción OT", "Descripcion OT"];
const DESC_OP: &[&str] = &["Descripción OP", "Descripcion OP"];
const CUADRILLA: &[&str] = &["Cuadrilla"];
const ID_CUADRILLA: &[&str] = &["ID Cuadrilla", "Id Cuadrilla"];

const COLUMNS: [&[&str]; 7] = [CONTRATISTA, OT, UT, DESC_OT, DESC_OP, CUADRILLA, ID_CUADRILLA];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetRows {
    /// Sheet the rows came from, for formats that have sheets.
    pub sheet: Option<String>,
    pub rows: Vec<TaskFields>,
}

pub trait RowSource: Send + Sync {
    fn read_rows(&self, contents: &[u8]) -> Result<SheetRows>;
}

/// Reads a delimited text export with a header row.
#[derive(Debug, Clone)]
pub struct CsvRowSource {
    delimiter: u8,
}

impl Default for CsvRowSource {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl CsvRowSource {
    pub fn with_delimiter(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl RowSource for CsvRowSource {
    fn read_rows(&self, contents: &[u8]) -> Result<SheetRows> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(contents);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|cell| cell.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let mut indices = [0usize; 7];
        let mut missing = Vec::new();
        for (slot, aliases) in COLUMNS.iter().enumerate() {
            match headers.iter().position(|h| aliases.contains(&h.as_str())) {
                Some(idx) => indices[slot] = idx,
                None => missing.push(aliases[0]),
            }
        }
        if !missing.is_empty() {
            return Err(CoreError::Validation(format!(
                "missing required columns: {}",
                missing.join(", ")
            )));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let cell = |slot: usize| record.get(indices[slot]).unwrap_or("").trim().to_string();
            let fields = TaskFields {
                contratista: cell(0),
                ot: cell(1),
                ut: cell(2),
                desc_ot: cell(3),
                desc_op: cell(4),
                cuadrilla: cell(5),
                id_cuadrilla: cell(6),
            };

            let line = record.position().map(|p| p.line()).unwrap_or_default();
            if let Some(fields) = check_required(fields, line)? {
                rows.push(fields);
            }
        }

        Ok(SheetRows { sheet: None, rows })
    }
}

/// Blank rows are dropped; a row with only some of OT / Cuadrilla / ID Cuadrilla is rejected.
fn check_required(fields: TaskFields, line: u64) -> Result<Option<TaskFields>> {
    let required = [
        ("OT", &fields.ot),
        ("Cuadrilla", &fields.cuadrilla),
        ("ID Cuadrilla", &fields.id_cuadrilla),
    ];
    let empty: Vec<&str> = required
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| *name)
        .collect();

    if empty.len() == required.len() {
        return Ok(None);
    }
    if !empty.is_empty() {
        return Err(CoreError::Validation(format!(
            "line {line}: empty required field(s) {}",
            empty.join(", ")
        )));
    }
    Ok(Some(fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "Contratista,OT,UT,Descripción OT,Descripción OP,Cuadrilla,ID Cuadrilla\n";

    #[test]
    fn reads_rows_and_skips_blank_lines() {
        let csv = format!(
            "{HEADER}ACME , 1001 ,UT-1,Mant,Poda,Norte,17\n,,,,,,\nACME,1002,UT-2,Mant,Tala,Sur,18\n"
        );
        let sheet = CsvRowSource::default()
            .read_rows(csv.as_bytes())
            .expect("valid csv");
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[0].contratista, "ACME");
        assert_eq!(sheet.rows[0].ot, "1001");
        assert_eq!(sheet.rows[1].cuadrilla, "Sur");
        assert_eq!(sheet.sheet, None);
    }

    #[test]
    fn accepts_unaccented_headers_in_any_order() {
        let csv = "ID Cuadrilla;Cuadrilla;Descripcion OP;Descripcion OT;UT;OT;Contratista\n\
                   17;Norte;Poda;Mant;UT-1;1001;ACME\n";
        let sheet = CsvRowSource::with_delimiter(b';')
            .read_rows(csv.as_bytes())
            .expect("valid csv");
        assert_eq!(sheet.rows.len(), 1);
        let row = &sheet.rows[0];
        assert_eq!(row.id_cuadrilla, "17");
        assert_eq!(row.desc_op, "Poda");
        assert_eq!(row.contratista, "ACME");
    }

    #[test]
    fn missing_columns_are_named() {
        let csv = "Contratista,OT,UT\nACME,1,2\n";
        match CsvRowSource::default().read_rows(csv.as_bytes()) {
            Err(CoreError::Validation(message)) => {
                assert!(message.contains("Cuadrilla"), "{message}");
                assert!(message.contains("Descripción OT"), "{message}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn partial_row_aborts_the_file() {
        let csv = format!("{HEADER}ACME,1001,UT-1,Mant,Poda,,17\n");
        match CsvRowSource::default().read_rows(csv.as_bytes()) {
            Err(CoreError::Validation(message)) => {
                assert!(message.contains("line 2"), "{message}");
                assert!(message.contains("Cuadrilla"), "{message}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn byte_order_mark_is_ignored() {
        let csv = format!("\u{feff}{HEADER}ACME,1001,UT-1,Mant,Poda,Norte,17\n");
        let sheet = CsvRowSource::default()
            .read_rows(csv.as_bytes())
            .expect("valid csv");
        assert_eq!(sheet.rows.len(), 1);
    }
}
