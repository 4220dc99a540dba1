//! Per-setting outcome counts and the results CSV format.
//!
//! The CSV has one column per parameter (in iteration order), then a
//! `<group>,<group>_rate` pair per declared group, then `total`. Rates and totals
//! are derived at write time and ignored when reading.

use crate::outcome::Outcome;
use crate::params::{ParamName, ParameterSpace};
use crate::setting::Setting;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use thiserror::Error;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("outcome group '{0}' was not declared for this campaign")]
    UndeclaredGroup(String),
    #[error("setting has {found} values but the campaign has {expected} parameters")]
    SettingArity { expected: usize, found: usize },
    #[error("results I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("results CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed results row {line}: {reason}")]
    MalformedRow { line: u64, reason: String },
    #[error("results parameters {found:?} do not match campaign parameters {expected:?}")]
    ParameterMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
}

/// Accumulates `Setting -> {group -> count}` in first-seen order.
#[derive(Debug, Clone)]
pub struct ResultsStore {
    params: Vec<ParamName>,
    groups: Vec<String>,
    rows: Vec<(Setting, Vec<u64>)>,
    index: HashMap<Setting, usize>,
    group_totals: Vec<u64>,
}

impl ResultsStore {
    pub fn new(params: Vec<ParamName>, groups: Vec<String>) -> Self {
        let group_totals = vec![0; groups.len()];
        Self {
            params,
            groups,
            rows: Vec::new(),
            index: HashMap::new(),
            group_totals,
        }
    }

    /// An empty store with the space's iteration order and declared groups.
    pub fn for_space(space: &ParameterSpace) -> Self {
        Self::new(space.param_order().to_vec(), space.groups())
    }

    pub fn params(&self) -> &[ParamName] {
        &self.params
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    fn group_index(&self, group: &str) -> Result<usize, ResultsError> {
        self.groups
            .iter()
            .position(|g| g == group)
            .ok_or_else(|| ResultsError::UndeclaredGroup(group.to_string()))
    }

    pub fn add(&mut self, outcome: &Outcome, setting: &Setting) -> Result<(), ResultsError> {
        self.add_count(outcome.group_name(), setting, 1)
    }

    pub fn add_count(&mut self, group: &str, setting: &Setting, count: u64) -> Result<(), ResultsError> {
        let group_idx = self.group_index(group)?;
        if setting.len() != self.params.len() {
            return Err(ResultsError::SettingArity {
                expected: self.params.len(),
                found: setting.len(),
            });
        }
        let row = match self.index.get(setting) {
            Some(row) => *row,
            None => {
                self.rows.push((setting.clone(), vec![0; self.groups.len()]));
                self.index.insert(setting.clone(), self.rows.len() - 1);
                self.rows.len() - 1
            }
        };
        self.rows[row].1[group_idx] += count;
        self.group_totals[group_idx] += count;
        Ok(())
    }

    pub fn count(&self, setting: &Setting, group: &str) -> u64 {
        let Ok(group_idx) = self.group_index(group) else {
            return 0;
        };
        self.index
            .get(setting)
            .map(|row| self.rows[*row].1[group_idx])
            .unwrap_or(0)
    }

    /// Attempts counted under `group` across every setting.
    pub fn group_count(&self, group: &str) -> u64 {
        self.group_index(group)
            .map(|idx| self.group_totals[idx])
            .unwrap_or(0)
    }

    /// `(group, count)` for every declared group, in column order.
    pub fn group_counts(&self) -> impl Iterator<Item = (&str, u64)> {
        self.groups
            .iter()
            .map(String::as_str)
            .zip(self.group_totals.iter().copied())
    }

    pub fn total(&self) -> u64 {
        self.group_totals.iter().sum()
    }

    /// Distinct settings seen so far.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&Setting, &[u64])> {
        self.rows.iter().map(|(setting, counts)| (setting, counts.as_slice()))
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), ResultsError> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        let mut header: Vec<String> = self.params.iter().map(|p| p.as_str().to_string()).collect();
        for group in &self.groups {
            header.push(group.clone());
            header.push(format!("{group}_rate"));
        }
        header.push("total".to_string());
        csv_writer.write_record(&header)?;

        for (setting, counts) in &self.rows {
            let total: u64 = counts.iter().sum();
            let mut record: Vec<String> = setting.values().iter().map(|v| v.to_string()).collect();
            for count in counts {
                let rate = if total > 0 { *count as f64 / total as f64 } else { 0.0 };
                record.push(count.to_string());
                record.push(rate.to_string());
            }
            record.push(total.to_string());
            csv_writer.write_record(&record)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, ResultsError> {
        let mut buffer = Vec::new();
        self.write_csv(&mut buffer)?;
        Ok(buffer)
    }

    /// Re-adds every count in `table`, reordering columns to this store's parameter order.
    ///
    /// Returns the settings that have a nonzero `success` count, in row order.
    pub fn replay(&mut self, table: &ResultsTable) -> Result<Vec<Setting>, ResultsError> {
        let mut sorted_table = table.params.clone();
        let mut sorted_store = self.params.clone();
        sorted_table.sort();
        sorted_store.sort();
        if sorted_table != sorted_store {
            return Err(ResultsError::ParameterMismatch {
                expected: self.params.iter().map(|p| p.to_string()).collect(),
                found: table.params.iter().map(|p| p.to_string()).collect(),
            });
        }
        for group in &table.groups {
            self.group_index(group)?;
        }

        let column_of: Vec<usize> = self
            .params
            .iter()
            .filter_map(|param| table.params.iter().position(|p| p == param))
            .collect();

        let mut successes = Vec::new();
        for (values, counts) in &table.rows {
            let setting = Setting::new(column_of.iter().map(|col| values[*col]).collect());
            for (group, count) in table.groups.iter().zip(counts) {
                if *count > 0 {
                    self.add_count(group, &setting, *count)?;
                    if group == Outcome::Success.group_name() {
                        successes.push(setting.clone());
                    }
                }
            }
        }
        Ok(successes)
    }
}

/// The counts read back from a results CSV, in file column order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsTable {
    pub params: Vec<ParamName>,
    pub groups: Vec<String>,
    pub rows: Vec<(Vec<f64>, Vec<u64>)>,
}

enum Column {
    Param(ParamName),
    Group,
    Derived,
}

fn classify_column(name: &str) -> Column {
    if let Ok(param) = name.parse::<ParamName>() {
        Column::Param(param)
    } else if name.ends_with("_rate") || name == "total" {
        Column::Derived
    } else {
        Column::Group
    }
}

pub fn read_results_csv(path: &Path) -> Result<ResultsTable, ResultsError> {
    let file = File::open(path)?;
    parse_results_csv(file)
}

/// Parses a results CSV. A leading UTF-8 byte order mark is ignored.
pub fn parse_results_csv<R: Read>(mut reader: R) -> Result<ResultsTable, ResultsError> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    let body = raw.strip_prefix(UTF8_BOM).unwrap_or(&raw[..]);

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(body);

    let headers = csv_reader.headers()?.clone();
    let columns: Vec<Column> = headers.iter().map(classify_column).collect();

    let mut params = Vec::new();
    let mut groups = Vec::new();
    for (column, name) in columns.iter().zip(headers.iter()) {
        match column {
            Column::Param(param) => params.push(*param),
            Column::Group => groups.push(name.to_string()),
            Column::Derived => {}
        }
    }
    if params.is_empty() {
        return Err(ResultsError::ParameterMismatch {
            expected: ParamName::ALL.iter().map(|p| p.to_string()).collect(),
            found: Vec::new(),
        });
    }

    let mut rows = Vec::new();
    for (row_idx, record) in csv_reader.records().enumerate() {
        let record = record?;
        let line = row_idx as u64 + 2;
        let malformed = |reason: String| ResultsError::MalformedRow { line, reason };

        let mut values = Vec::with_capacity(params.len());
        let mut counts = Vec::with_capacity(groups.len());
        for (col, column) in columns.iter().enumerate() {
            let field = record
                .get(col)
                .ok_or_else(|| malformed(format!("missing column {}", col + 1)))?;
            match column {
                Column::Param(param) => {
                    let value: f64 = field
                        .parse()
                        .map_err(|_| malformed(format!("{param} value '{field}' is not a number")))?;
                    if param.is_integer_only() && value.fract() != 0.0 {
                        return Err(malformed(format!("{param} value '{field}' is not an integer")));
                    }
                    values.push(value);
                }
                Column::Group => {
                    let count: u64 = field
                        .parse()
                        .map_err(|_| malformed(format!("count '{field}' is not a whole number")))?;
                    counts.push(count);
                }
                Column::Derived => {}
            }
        }
        rows.push((values, counts));
    }

    Ok(ResultsTable {
        params,
        groups,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ResultsStore {
        ResultsStore::new(
            ParamName::ALL.to_vec(),
            vec![
                "success".to_string(),
                "reset".to_string(),
                "normal".to_string(),
                "skipped".to_string(),
                "interesting".to_string(),
            ],
        )
    }

    fn setting(width: f64, offset: f64) -> Setting {
        Setting::new(vec![width, offset, 12.0, 3.0])
    }

    #[test]
    fn counts_accumulate_per_setting_and_group() {
        let mut results = store();
        results.add(&Outcome::Reset, &setting(1.5, -2.0)).unwrap();
        results.add(&Outcome::Reset, &setting(1.5, -2.0)).unwrap();
        results.add(&Outcome::Success, &setting(1.5, -2.0)).unwrap();
        results.add(&Outcome::Normal, &setting(2.0, -2.0)).unwrap();

        assert_eq!(results.count(&setting(1.5, -2.0), "reset"), 2);
        assert_eq!(results.count(&setting(1.5, -2.0), "success"), 1);
        assert_eq!(results.count(&setting(9.0, 9.0), "reset"), 0);
        assert_eq!(results.group_count("reset"), 2);
        assert_eq!(results.total(), 4);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn undeclared_groups_and_wrong_arity_are_rejected() {
        let mut results = store();
        assert!(matches!(
            results.add(&Outcome::Custom("weird".to_string()), &setting(1.0, 1.0)),
            Err(ResultsError::UndeclaredGroup(g)) if g == "weird"
        ));
        assert!(matches!(
            results.add(&Outcome::Normal, &Setting::new(vec![1.0])),
            Err(ResultsError::SettingArity {
                expected: 4,
                found: 1
            })
        ));
        assert_eq!(results.total(), 0);
    }

    #[test]
    fn csv_has_param_group_rate_and_total_columns() {
        let mut results = store();
        results.add(&Outcome::Reset, &setting(1.5, -2.0)).unwrap();
        results.add(&Outcome::Reset, &setting(1.5, -2.0)).unwrap();
        results.add(&Outcome::Success, &setting(1.5, -2.0)).unwrap();
        results.add(&Outcome::Success, &setting(1.5, -2.0)).unwrap();

        let text = String::from_utf8(results.to_csv_bytes().unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "width,offset,ext_offset,repeat,success,success_rate,reset,reset_rate,normal,normal_rate,skipped,skipped_rate,interesting,interesting_rate,total"
        );
        assert_eq!(
            lines.next().unwrap(),
            "1.5,-2,12,3,2,0.5,2,0.5,0,0,0,0,0,0,4"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn empty_store_writes_a_header_only_csv() {
        let text = String::from_utf8(store().to_csv_bytes().unwrap()).unwrap();
        assert_eq!(text.lines().count(), 1);
        let table = parse_results_csv(text.as_bytes()).unwrap();
        assert!(table.rows.is_empty());
        assert_eq!(table.groups.len(), 5);
    }

    #[test]
    fn csv_round_trip_reproduces_counts() {
        let mut original = store();
        let outcomes = [
            (Outcome::Reset, setting(-3.2, 4.4)),
            (Outcome::Normal, setting(-3.2, 4.4)),
            (Outcome::Normal, setting(0.4, 4.4)),
            (Outcome::Success, setting(0.4, 4.4)),
            (Outcome::Custom("interesting".to_string()), setting(7.6, -11.1)),
            (Outcome::Skipped, setting(7.6, -11.1)),
        ];
        for (outcome, s) in &outcomes {
            original.add(outcome, s).unwrap();
        }

        let bytes = original.to_csv_bytes().unwrap();
        let table = parse_results_csv(bytes.as_slice()).unwrap();
        let mut restored = store();
        let successes = restored.replay(&table).unwrap();

        assert_eq!(successes, vec![setting(0.4, 4.4)]);
        assert_eq!(restored.total(), original.total());
        for (s, _) in original.rows() {
            for group in original.groups() {
                assert_eq!(
                    restored.count(s, group),
                    original.count(s, group),
                    "count mismatch for {s} / {group}"
                );
            }
        }
        assert_eq!(restored.to_csv_bytes().unwrap(), bytes);
    }

    #[test]
    fn byte_order_mark_is_ignored() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"width,offset,ext_offset,repeat,success,success_rate,reset,reset_rate,total\n");
        bytes.extend_from_slice(b"1.2,3.4,5,6,1,0.25,3,0.75,4\n");
        let table = parse_results_csv(bytes.as_slice()).unwrap();
        assert_eq!(table.params, ParamName::ALL.to_vec());
        assert_eq!(table.groups, vec!["success", "reset"]);
        assert_eq!(table.rows, vec![(vec![1.2, 3.4, 5.0, 6.0], vec![1, 3])]);
    }

    #[test]
    fn replay_reorders_columns_to_the_store_order() {
        let text = "repeat,width,offset,ext_offset,reset,reset_rate,total\n3,1.5,-2,12,7,1,7\n";
        let table = parse_results_csv(text.as_bytes()).unwrap();
        let mut results = store();
        results.replay(&table).unwrap();
        assert_eq!(results.count(&setting(1.5, -2.0), "reset"), 7);
    }

    #[test]
    fn replay_rejects_unknown_groups_and_missing_params() {
        let text = "width,offset,ext_offset,repeat,glitchy,glitchy_rate,total\n1,2,3,4,1,1,1\n";
        let table = parse_results_csv(text.as_bytes()).unwrap();
        assert!(matches!(
            store().replay(&table),
            Err(ResultsError::UndeclaredGroup(_))
        ));

        let text = "width,offset,reset,reset_rate,total\n1,2,1,1,1\n";
        let table = parse_results_csv(text.as_bytes()).unwrap();
        assert!(matches!(
            store().replay(&table),
            Err(ResultsError::ParameterMismatch { .. })
        ));
    }

    #[test]
    fn malformed_rows_report_their_line() {
        let text = "width,offset,ext_offset,repeat,reset,reset_rate,total\n1,2,3,4,1,1,1\n1,2,3.5,4,1,1,1\n";
        assert!(matches!(
            parse_results_csv(text.as_bytes()),
            Err(ResultsError::MalformedRow { line: 3, .. })
        ));
    }
}
