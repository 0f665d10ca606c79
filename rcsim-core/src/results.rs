//! Tabular assembly of reconciled snapshots.

use ndarray::{Array1, Array2, ArrayView1};
use serde::Serialize;
use std::collections::HashMap;

use crate::errors::{RcsimError, RcsimResult};
use crate::recorder::Snapshot;
use crate::variable::{FloatValue, Time};

/// Tabular result of a run: one row per requested evaluation time and one
/// column per requested output, in the order requested.
///
/// Rows are strictly ascending in time with no duplicates. Export to an
/// external tabular structure happens through [`ResultTable::rows`] or the
/// column accessors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultTable {
    times: Array1<Time>,
    columns: Vec<String>,
    values: Array2<FloatValue>,
}

impl ResultTable {
    pub fn times(&self) -> &Array1<Time> {
        &self.times
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Value at a given row for a named output.
    pub fn value(&self, row: usize, name: &str) -> Option<FloatValue> {
        let column = self.columns.iter().position(|c| c == name)?;
        self.values.get((row, column)).copied()
    }

    /// Full column for a named output.
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, FloatValue>> {
        let column = self.columns.iter().position(|c| c == name)?;
        Some(self.values.column(column))
    }

    /// Iterate rows as `(time, name -> value)` mappings.
    pub fn rows(&self) -> impl Iterator<Item = (Time, HashMap<String, FloatValue>)> + '_ {
        self.times
            .iter()
            .zip(self.values.rows())
            .map(move |(&time, row)| {
                let mapping = self
                    .columns
                    .iter()
                    .zip(row.iter())
                    .map(|(name, &value)| (name.clone(), value))
                    .collect();
                (time, mapping)
            })
    }
}

/// Project the reconciled, time-ordered snapshots onto the requested
/// outputs.
///
/// A requested output that is absent from any snapshot fails the run;
/// partial rows are never silently padded.
pub fn assemble(snapshots: &[Snapshot], requested_outputs: &[String]) -> RcsimResult<ResultTable> {
    for pair in snapshots.windows(2) {
        if !(pair[1].time > pair[0].time) {
            return Err(RcsimError::Definition(format!(
                "result rows must be strictly ascending in time, got {} then {}",
                pair[0].time, pair[1].time
            )));
        }
    }

    let mut values = Array2::zeros((snapshots.len(), requested_outputs.len()));
    for (i, snapshot) in snapshots.iter().enumerate() {
        for (j, name) in requested_outputs.iter().enumerate() {
            match snapshot.values.get(name) {
                Some(&value) => values[[i, j]] = value,
                None => {
                    return Err(RcsimError::Definition(format!(
                        "requested output {name} was not captured at t = {}",
                        snapshot.time
                    )));
                }
            }
        }
    }

    Ok(ResultTable {
        times: snapshots.iter().map(|s| s.time).collect(),
        columns: requested_outputs.to_vec(),
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(time: Time, pairs: &[(&str, FloatValue)]) -> Snapshot {
        Snapshot {
            time,
            values: pairs
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
        }
    }

    fn outputs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn columns_follow_the_requested_order() {
        let snapshots = vec![
            snapshot(0.0, &[("a", 1.0), ("b", 2.0), ("c", 3.0)]),
            snapshot(1.0, &[("a", 4.0), ("b", 5.0), ("c", 6.0)]),
        ];
        let table = assemble(&snapshots, &outputs(&["c", "a"])).unwrap();
        assert_eq!(table.columns(), &["c".to_string(), "a".to_string()]);
        assert_eq!(table.value(0, "c"), Some(3.0));
        assert_eq!(table.value(1, "a"), Some(4.0));
        // The unrequested output is not a column.
        assert_eq!(table.value(0, "b"), None);
    }

    #[test]
    fn one_row_per_snapshot() {
        let snapshots = vec![
            snapshot(0.0, &[("x", 0.0)]),
            snapshot(10.0, &[("x", 1.0)]),
            snapshot(20.0, &[("x", 2.0)]),
        ];
        let table = assemble(&snapshots, &outputs(&["x"])).unwrap();
        assert_eq!(table.n_rows(), 3);
        assert_eq!(table.times().to_vec(), vec![0.0, 10.0, 20.0]);
    }

    #[test]
    fn missing_output_is_a_definition_error() {
        let snapshots = vec![snapshot(0.0, &[("a", 1.0)])];
        let err = assemble(&snapshots, &outputs(&["a", "ghost"])).unwrap_err();
        assert!(matches!(err, RcsimError::Definition(_)));
    }

    #[test]
    fn duplicate_times_are_rejected() {
        let snapshots = vec![snapshot(0.0, &[("a", 1.0)]), snapshot(0.0, &[("a", 2.0)])];
        let err = assemble(&snapshots, &outputs(&["a"])).unwrap_err();
        assert!(matches!(err, RcsimError::Definition(_)));
    }

    #[test]
    fn rows_expose_name_value_mappings() {
        let snapshots = vec![
            snapshot(0.0, &[("a", 1.0), ("b", 2.0)]),
            snapshot(1.0, &[("a", 3.0), ("b", 4.0)]),
        ];
        let table = assemble(&snapshots, &outputs(&["a", "b"])).unwrap();
        let rows: Vec<_> = table.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].0, 1.0);
        assert_eq!(rows[1].1["b"], 4.0);
    }

    #[test]
    fn tables_serialise() {
        let snapshots = vec![snapshot(0.0, &[("a", 1.0)])];
        let table = assemble(&snapshots, &outputs(&["a"])).unwrap();
        let json = serde_json::to_string(&table).unwrap();
        assert!(json.contains("\"columns\""));
    }
}
