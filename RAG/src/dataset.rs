use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

/// Columns of the medicine dataset that make up a record text, in output order.
pub const MEDICINE_COLUMNS: [&str; 58] = [
    "id",
    "name",
    "substitute0",
    "substitute1",
    "substitute2",
    "substitute3",
    "substitute4",
    "sideEffect0",
    "sideEffect1",
    "sideEffect2",
    "sideEffect3",
    "sideEffect4",
    "sideEffect5",
    "sideEffect6",
    "sideEffect7",
    "sideEffect8",
    "sideEffect9",
    "sideEffect10",
    "sideEffect11",
    "sideEffect12",
    "sideEffect13",
    "sideEffect14",
    "sideEffect15",
    "sideEffect16",
    "sideEffect17",
    "sideEffect18",
    "sideEffect19",
    "sideEffect20",
    "sideEffect21",
    "sideEffect22",
    "sideEffect23",
    "sideEffect24",
    "sideEffect25",
    "sideEffect26",
    "sideEffect27",
    "sideEffect28",
    "sideEffect29",
    "sideEffect30",
    "sideEffect31",
    "sideEffect32",
    "sideEffect33",
    "sideEffect34",
    "sideEffect35",
    "sideEffect36",
    "sideEffect37",
    "sideEffect38",
    "sideEffect39",
    "sideEffect40",
    "sideEffect41",
    "use0",
    "use1",
    "use2",
    "use3",
    "use4",
    "Chemical Class",
    "Habit Forming",
    "Therapeutic Class",
    "Action Class",
];

pub struct DatasetProcessor {
    whitespace: Regex,
}

impl DatasetProcessor {
    pub fn new() -> Self {
        Self {
            whitespace: Regex::new(r"\s+").expect("static regex"),
        }
    }

    /// Reads the CSV at `csv_path` and renders each row as `"col: value. col: value"`.
    ///
    /// Duplicate record texts are dropped, keeping the first occurrence, so the
    /// position of a text in the result is a stable entity id for one file.
    pub fn parse_csv(&self, csv_path: &Path, columns: &[&str]) -> Result<Vec<String>> {
        log::info!("Parsing dataset: {}", csv_path.display());

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(csv_path)
            .with_context(|| format!("failed to open dataset {}", csv_path.display()))?;

        let headers = reader
            .headers()
            .with_context(|| format!("failed to read header of {}", csv_path.display()))?
            .clone();
        let positions: Vec<Option<usize>> = columns
            .iter()
            .map(|col| headers.iter().position(|h| h.trim() == *col))
            .collect();

        for (col, pos) in columns.iter().zip(&positions) {
            if pos.is_none() {
                log::warn!("Column '{}' missing from {}", col, csv_path.display());
            }
        }

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        let mut rows = 0usize;

        for result in reader.records() {
            let row = result
                .with_context(|| format!("malformed row in {}", csv_path.display()))?;
            rows += 1;

            let text = columns
                .iter()
                .zip(&positions)
                .map(|(col, pos)| {
                    let value = pos.and_then(|idx| row.get(idx)).unwrap_or("");
                    format!("{}: {}", col, self.clean_value(value))
                })
                .collect::<Vec<_>>()
                .join(". ");

            if seen.insert(text.clone()) {
                records.push(text);
            }
        }

        log::info!(
            "Parsed {} rows into {} unique records",
            rows,
            records.len()
        );
        Ok(records)
    }

    fn clean_value(&self, value: &str) -> String {
        self.whitespace.replace_all(value.trim(), " ").into_owned()
    }
}

impl Default for DatasetProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn renders_requested_columns_in_order() {
        let file = write_csv(
            "name,id,use0,extra\n\
             Augmentin 625,1,Treatment of  Bacterial infections,ignored\n",
        );
        let records = DatasetProcessor::new()
            .parse_csv(file.path(), &["id", "name", "use0"])
            .unwrap();

        assert_eq!(
            records,
            vec!["id: 1. name: Augmentin 625. use0: Treatment of Bacterial infections"]
        );
    }

    #[test]
    fn drops_duplicates_keeping_first() {
        let file = write_csv("id,name\n1,A\n2,B\n1,A\n3,C\n");
        let records = DatasetProcessor::new()
            .parse_csv(file.path(), &["id", "name"])
            .unwrap();

        assert_eq!(records, vec!["id: 1. name: A", "id: 2. name: B", "id: 3. name: C"]);
    }

    #[test]
    fn missing_columns_render_empty() {
        let file = write_csv("id,name\n7,Azithral\n");
        let records = DatasetProcessor::new()
            .parse_csv(file.path(), &["id", "Habit Forming"])
            .unwrap();

        assert_eq!(records, vec!["id: 7. Habit Forming: "]);
    }

    #[test]
    fn short_rows_are_tolerated() {
        let file = write_csv("id,name,use0\n4,Crocin\n");
        let records = DatasetProcessor::new()
            .parse_csv(file.path(), &["id", "name", "use0"])
            .unwrap();

        assert_eq!(records, vec!["id: 4. name: Crocin. use0: "]);
    }

    #[test]
    fn missing_file_mentions_path() {
        let err = DatasetProcessor::new()
            .parse_csv(Path::new("/nonexistent/medicines.csv"), &MEDICINE_COLUMNS)
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/medicines.csv"));
    }

    #[test]
    fn medicine_columns_cover_all_side_effects() {
        let side_effects = MEDICINE_COLUMNS
            .iter()
            .filter(|c| c.starts_with("sideEffect"))
            .count();
        assert_eq!(side_effects, 42);
        assert_eq!(MEDICINE_COLUMNS.last(), Some(&"Action Class"));
    }
}
