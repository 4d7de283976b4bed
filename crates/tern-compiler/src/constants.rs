//! Module-wide constant tables
//!
//! Strings and BigInts referenced by bytecode live in tables shared by every
//! function of a module. Functions may be emitted on several threads at
//! once, so the tables sit behind a mutex and interning is a single
//! insert-or-lookup step.

use num_bigint::BigInt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
struct Tables {
    strings: Vec<String>,
    string_index: FxHashMap<String, u32>,
    bigints: Vec<BigInt>,
    bigint_index: FxHashMap<BigInt, u32>,
}

/// Deduplicated string and BigInt constants of one module
#[derive(Debug, Default)]
pub struct ConstantTable {
    tables: Mutex<Tables>,
}

impl ConstantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `s`, adding it on first use
    pub fn intern_string(&self, s: &str) -> u32 {
        let mut tables = self.tables.lock();
        if let Some(&index) = tables.string_index.get(s) {
            return index;
        }
        let index = tables.strings.len() as u32;
        tables.strings.push(s.to_string());
        tables.string_index.insert(s.to_string(), index);
        index
    }

    /// Index of `n`, adding it on first use
    pub fn intern_bigint(&self, n: &BigInt) -> u32 {
        let mut tables = self.tables.lock();
        if let Some(&index) = tables.bigint_index.get(n) {
            return index;
        }
        let index = tables.bigints.len() as u32;
        tables.bigints.push(n.clone());
        tables.bigint_index.insert(n.clone(), index);
        index
    }

    pub fn string(&self, index: u32) -> Option<String> {
        self.tables.lock().strings.get(index as usize).cloned()
    }

    pub fn string_count(&self) -> usize {
        self.tables.lock().strings.len()
    }

    /// Consume the table, yielding strings and BigInts in index order
    pub fn into_tables(self) -> (Vec<String>, Vec<BigInt>) {
        let tables = self.tables.into_inner();
        (tables.strings, tables.bigints)
    }
}
