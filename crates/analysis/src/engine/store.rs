//! Summaries persisted as JSON, one file per function.
//!
//! The directory holds an `__index.json` object that maps function names to
//! the files of their summaries. File names are derived from function names
//! and get a `_N` suffix when two names would share a file.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use lattix_ir::{FuncRef, Module};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::SummaryDb;
use crate::{AnalysisError, Result};

pub const INDEX_FILE: &str = "__index.json";

#[derive(Debug)]
pub struct SummaryStore {
    dir: PathBuf,
    index: BTreeMap<String, String>,
}

impl SummaryStore {
    /// Opens the store in `dir`, creating the directory if needed. A
    /// directory without an index is an empty store.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let index_path = dir.join(INDEX_FILE);
        let index = if index_path.is_file() {
            serde_json::from_reader(BufReader::new(File::open(&index_path)?))?
        } else {
            warn!(dir = %dir.display(), "no summary index, starting with an empty store");
            BTreeMap::new()
        };

        Ok(Self { dir, index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Returns the file holding the summary of `name`, relative to the
    /// store directory.
    pub fn file_name(&self, name: &str) -> Option<&str> {
        self.index.get(name).map(String::as_str)
    }

    /// Iterates over the stored function names in ascending order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    /// Writes the summary of `name`. The index is only written by
    /// [`SummaryStore::save_index`].
    pub fn insert<S: Serialize>(&mut self, name: &str, summary: &S) -> Result<()> {
        let file = self.assign_file(name);
        let mut w = BufWriter::new(File::create(self.dir.join(&file))?);
        serde_json::to_writer_pretty(&mut w, summary)?;
        w.flush()?;
        Ok(())
    }

    pub fn save_index(&self) -> Result<()> {
        let mut w = BufWriter::new(File::create(self.dir.join(INDEX_FILE))?);
        serde_json::to_writer_pretty(&mut w, &self.index)?;
        w.flush()?;
        Ok(())
    }

    /// Writes every summary of `db` and the index.
    pub fn save_all<S: Serialize>(&mut self, module: &Module, db: &SummaryDb<S>) -> Result<usize> {
        for (func, summary) in db.iter() {
            self.insert(module.func_name(func), &**summary)?;
        }
        self.save_index()?;

        debug!(summaries = db.len(), dir = %self.dir.display(), "summaries saved");
        Ok(db.len())
    }

    /// Reads the summary of `name`. Returns `None` if the store has none.
    pub fn load<S: DeserializeOwned>(&self, name: &str) -> Result<Option<S>> {
        let Some(file) = self.index.get(name) else {
            debug!(name, "no stored summary");
            return Ok(None);
        };

        let reader = BufReader::new(File::open(self.dir.join(file))?);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    /// Adds the stored summary of `func` to `db`. Returns `false` if the
    /// store has none. A function that `db` already summarizes is left alone.
    pub fn load_into<S: DeserializeOwned>(
        &self,
        module: &Module,
        db: &mut SummaryDb<S>,
        func: FuncRef,
    ) -> Result<bool> {
        if db.contains(func) {
            return Ok(true);
        }

        let function = module
            .get_func(func)
            .ok_or(AnalysisError::UnknownFunction(func))?;
        match self.load(function.name())? {
            Some(summary) => {
                db.insert(func, Arc::new(summary));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Adds every stored summary to `db`. Every stored name must be a
    /// function of `module`.
    pub fn load_all<S: DeserializeOwned>(
        &self,
        module: &Module,
        db: &mut SummaryDb<S>,
    ) -> Result<usize> {
        let mut loaded = 0;
        for name in self.index.keys() {
            let func = module
                .lookup_func(name)
                .ok_or_else(|| AnalysisError::UnknownFunctionName(name.clone()))?;
            if !db.contains(func) && self.load_into(module, db, func)? {
                loaded += 1;
            }
        }

        debug!(summaries = loaded, dir = %self.dir.display(), "summaries loaded");
        Ok(loaded)
    }

    fn assign_file(&mut self, name: &str) -> String {
        if let Some(file) = self.index.get(name) {
            return file.clone();
        }

        let prefix = to_file_name(name);
        let used: BTreeSet<&str> = self.index.values().map(String::as_str).collect();
        let mut file = format!("{prefix}.json");
        let mut suffix = 1;
        while file == INDEX_FILE || used.contains(file.as_str()) {
            file = format!("{prefix}_{suffix}.json");
            suffix += 1;
        }

        self.index.insert(name.to_string(), file.clone());
        file
    }
}

/// Replaces the characters of a function name that don't belong in a file
/// name.
pub fn to_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '#' => '_',
            ':' | '/' | '\\' => '.',
            '<' => '[',
            '>' => ']',
            c => c,
        })
        .collect()
}
