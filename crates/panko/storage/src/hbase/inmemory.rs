//! In-process column store selected by the `__test__` host.

use super::query::ScanSpec;
use super::{ColumnClient, ColumnRow};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::RwLock;

type Table = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// Sorted rows per table, with the same scan semantics as the gateway.
#[derive(Default)]
pub struct MemoryColumnStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryColumnStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn no_such_table(table: &str) -> StorageError {
    StorageError::Backend(format!("table `{table}` does not exist"))
}

fn poisoned() -> StorageError {
    StorageError::Backend("column store lock poisoned".to_string())
}

#[async_trait]
impl ColumnClient for MemoryColumnStore {
    async fn create_table(&self, table: &str, _family: &str) -> StorageResult<()> {
        let mut guard = self.tables.write().map_err(|_| poisoned())?;
        guard.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn truncate_table(&self, table: &str) -> StorageResult<()> {
        let mut guard = self.tables.write().map_err(|_| poisoned())?;
        guard.insert(table.to_string(), Table::new());
        Ok(())
    }

    async fn put(&self, table: &str, row: &ColumnRow) -> StorageResult<()> {
        let mut guard = self.tables.write().map_err(|_| poisoned())?;
        let rows = guard.get_mut(table).ok_or_else(|| no_such_table(table))?;
        rows.entry(row.key.clone())
            .or_default()
            .extend(row.cells.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn get(&self, table: &str, key: &str) -> StorageResult<Option<ColumnRow>> {
        let guard = self.tables.read().map_err(|_| poisoned())?;
        let rows = guard.get(table).ok_or_else(|| no_such_table(table))?;
        Ok(rows.get(key).map(|cells| ColumnRow {
            key: key.to_string(),
            cells: cells.clone(),
        }))
    }

    /// Check and write happen under one write lock.
    async fn check_and_put(
        &self,
        table: &str,
        row: &ColumnRow,
        check_column: &str,
    ) -> StorageResult<bool> {
        let mut guard = self.tables.write().map_err(|_| poisoned())?;
        let rows = guard.get_mut(table).ok_or_else(|| no_such_table(table))?;
        let cells = rows.entry(row.key.clone()).or_default();
        if cells.contains_key(check_column) {
            return Ok(false);
        }
        cells.extend(row.cells.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(true)
    }

    async fn scan(
        &self,
        table: &str,
        spec: &ScanSpec,
        limit: Option<usize>,
    ) -> StorageResult<Vec<ColumnRow>> {
        let guard = self.tables.read().map_err(|_| poisoned())?;
        let rows = guard.get(table).ok_or_else(|| no_such_table(table))?;

        if let (Some(start), Some(stop)) = (&spec.row_start, &spec.row_stop) {
            if start >= stop {
                return Ok(Vec::new());
            }
        }
        let lower = spec
            .row_start
            .as_deref()
            .map_or(Bound::Unbounded, Bound::Included);
        let upper = spec
            .row_stop
            .as_deref()
            .map_or(Bound::Unbounded, Bound::Excluded);

        let matched = rows
            .range::<str, _>((lower, upper))
            .filter(|(key, cells)| spec.filter.as_ref().map_or(true, |f| f.matches(key, cells)))
            .map(|(key, cells)| ColumnRow {
                key: key.clone(),
                cells: cells.clone(),
            });
        Ok(match limit {
            Some(n) => matched.take(n).collect(),
            None => matched.collect(),
        })
    }

    async fn delete_rows(&self, table: &str, keys: &[String]) -> StorageResult<u64> {
        let mut guard = self.tables.write().map_err(|_| poisoned())?;
        let rows = guard.get_mut(table).ok_or_else(|| no_such_table(table))?;
        Ok(keys.iter().filter(|k| rows.remove(k.as_str()).is_some()).count() as u64)
    }
}
