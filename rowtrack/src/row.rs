use crate::error::HydrationError;
use crate::value::{FromColumn, Value};
use std::sync::Arc;

/// One row of a result set, as produced by the SQL layer.
pub trait Row {
    fn column_count(&self) -> usize;

    fn column_name(&self, ordinal: usize) -> &str;

    fn value(&self, ordinal: usize) -> &Value;

    fn ordinal(&self, name: &str) -> Option<usize> {
        (0..self.column_count()).find(|&i| self.column_name(i) == name)
    }

    fn ordinal_ignore_case(&self, name: &str) -> Option<usize> {
        self.ordinal(name)
            .or_else(|| (0..self.column_count()).find(|&i| self.column_name(i).eq_ignore_ascii_case(name)))
    }

    fn has_column(&self, name: &str) -> bool {
        self.ordinal(name).is_some()
    }

    fn is_null(&self, ordinal: usize) -> bool {
        self.value(ordinal).is_null()
    }

    /// Typed extraction by column name, outside of any entity mapping.
    fn get<V: FromColumn>(&self, name: &str) -> Result<V, HydrationError>
    where
        Self: Sized,
    {
        let ordinal = self.ordinal(name).ok_or_else(|| HydrationError::ColumnRequired {
            entity: "row",
            field: name.to_string(),
            column: name.to_string(),
        })?;
        V::from_column(self.value(ordinal)).map_err(|e| HydrationError::from_column("row", name, e))
    }
}

impl<R: Row + ?Sized> Row for &R {
    fn column_count(&self) -> usize {
        (**self).column_count()
    }

    fn column_name(&self, ordinal: usize) -> &str {
        (**self).column_name(ordinal)
    }

    fn value(&self, ordinal: usize) -> &Value {
        (**self).value(ordinal)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRow {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl MemoryRow {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let (columns, values): (Vec<String>, Vec<Value>) = pairs.into_iter().map(|(c, v)| (c.into(), v)).unzip();
        Self { columns: columns.into(), values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl Row for MemoryRow {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, ordinal: usize) -> &str {
        &self.columns[ordinal]
    }

    fn value(&self, ordinal: usize) -> &Value {
        &self.values[ordinal]
    }
}

/// Result set of one query execution, all rows sharing the same column list.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self { columns: columns.into_iter().map(Into::into).collect(), rows: Vec::new() }
    }

    pub fn push(&mut self, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.columns.len());
        self.rows.push(values);
    }

    pub fn with_row(mut self, values: Vec<Value>) -> Self {
        self.push(values);
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> Vec<MemoryRow> {
        let columns: Arc<[String]> = self.columns.clone().into();
        self.rows.iter().map(|values| MemoryRow::new(Arc::clone(&columns), values.clone())).collect()
    }
}

impl IntoIterator for RowSet {
    type Item = MemoryRow;
    type IntoIter = std::vec::IntoIter<MemoryRow>;

    fn into_iter(self) -> Self::IntoIter {
        let columns: Arc<[String]> = self.columns.into();
        self.rows
            .into_iter()
            .map(|values| MemoryRow::new(Arc::clone(&columns), values))
            .collect::<Vec<_>>()
            .into_iter()
    }
}
