//! Slot allocation from the jail.conf.d listing
//!
//! Every managed jail owns one file named `{slot}-{name}.conf`. The listing is
//! the only index: slots and names are recovered from filenames on each run.

use crate::error::{Error, Result};
use nom::{
    IResult, Parser,
    character::complete::{char, digit1},
    combinator::{map_res, rest},
    sequence::separated_pair,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const CONF_SUFFIX: &str = ".conf";

/// A parsed `{slot}-{name}.conf` filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfName {
    pub slot: u32,
    pub name: String,
}

impl ConfName {
    /// Parse a filename, returning `None` for anything outside the convention
    ///
    /// The split happens on the first `-`, so `3-web-1.conf` is slot 3, name `web-1`.
    pub fn parse(filename: &str) -> Option<Self> {
        let stem = filename.strip_suffix(CONF_SUFFIX)?;
        let (_, (slot, name)) = slot_and_name(stem).ok()?;

        if slot == 0 || name.is_empty() {
            return None;
        }

        Some(Self {
            slot,
            name: name.to_string(),
        })
    }

    /// Filename for a slot/name pair
    pub fn filename(slot: u32, name: &str) -> String {
        format!("{}-{}{}", slot, name, CONF_SUFFIX)
    }
}

fn slot_and_name(input: &str) -> IResult<&str, (u32, &str)> {
    separated_pair(map_res(digit1, |d: &str| d.parse::<u32>()), char('-'), rest).parse(input)
}

/// Return the lowest free slot for a listing of config filenames
///
/// Gaps left by deleted jails are reused before the range is extended.
/// Filenames outside the convention are ignored. Two files claiming the
/// same slot are reported instead of allocating around them.
pub fn next_slot<I, S>(filenames: I) -> Result<u32>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    next_slot_excluding(filenames, &[])
}

/// Like [`next_slot`], but never hands out a slot listed in `reserved`
pub fn next_slot_excluding<I, S>(filenames: I, reserved: &[u32]) -> Result<u32>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut used: BTreeMap<u32, String> = BTreeMap::new();

    for filename in filenames {
        let filename = filename.as_ref();
        let Some(parsed) = ConfName::parse(filename) else {
            continue;
        };
        if let Some(previous) = used.insert(parsed.slot, filename.to_string()) {
            return Err(Error::DataConsistency(format!(
                "slot {} is claimed by both '{}' and '{}'",
                parsed.slot, previous, filename
            )));
        }
    }

    let mut candidate: u32 = 1;
    while used.contains_key(&candidate) || reserved.contains(&candidate) {
        candidate = candidate.checked_add(1).ok_or_else(|| Error::InvalidSlot {
            slot: candidate,
            reason: "slot namespace exhausted".into(),
        })?;
    }

    Ok(candidate)
}

/// One managed config file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfEntry {
    pub slot: u32,
    pub name: String,
    pub path: PathBuf,
}

/// The directory holding per-jail config fragments
#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw filenames of regular files in the directory
    pub fn names(&self) -> Result<Vec<String>> {
        if !self.path.is_dir() {
            return Err(Error::DirectoryMissing(self.path.clone()));
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Parsed entries sorted by slot
    pub fn scan(&self) -> Result<Vec<ConfEntry>> {
        let mut entries: Vec<ConfEntry> = self
            .names()?
            .into_iter()
            .filter_map(|filename| {
                ConfName::parse(&filename).map(|parsed| ConfEntry {
                    slot: parsed.slot,
                    name: parsed.name,
                    path: self.path.join(&filename),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.slot.cmp(&b.slot).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    /// Next free slot for the current listing, skipping `reserved`
    pub fn next_slot(&self, reserved: &[u32]) -> Result<u32> {
        next_slot_excluding(self.names()?, reserved)
    }

    /// Locate the config entry for a jail name
    pub fn find(&self, name: &str) -> Result<Option<ConfEntry>> {
        Self::find_in(&self.scan()?, name)
    }

    /// Locate the entry holding a slot
    pub fn find_slot(&self, slot: u32) -> Result<Option<ConfEntry>> {
        let mut matches = self.scan()?.into_iter().filter(|e| e.slot == slot);
        let first = matches.next();
        if let Some(second) = matches.next() {
            return Err(Error::DataConsistency(format!(
                "slot {} is claimed by both '{}' and '{}'",
                slot,
                first.as_ref().map(|e| e.name.as_str()).unwrap_or_default(),
                second.name
            )));
        }
        Ok(first)
    }

    /// Locate a jail name within an already scanned listing
    pub fn find_in(entries: &[ConfEntry], name: &str) -> Result<Option<ConfEntry>> {
        let mut matches = entries.iter().filter(|e| e.name == name);
        let first = matches.next().cloned();
        if let Some(second) = matches.next() {
            return Err(Error::DataConsistency(format!(
                "jail '{}' has config files for slots {} and {}",
                name,
                first.as_ref().map(|e| e.slot).unwrap_or_default(),
                second.slot
            )));
        }
        Ok(first)
    }
}
