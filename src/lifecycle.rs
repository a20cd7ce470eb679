//! Jail create/delete orchestration
//!
//! Create: validate -> base archive present -> slot (allocated or declared) ->
//! name/slot collisions -> existing config (match skips, drift fails) ->
//! root directory -> extract -> write config.
//!
//! Delete: validate -> locate config -> config still matches render ->
//! confirm -> remove config -> clear flags (best effort) -> remove root.
//!
//! Once a create has made the jail root, any later failure removes it again
//! before the error is returned. The config file is written last with
//! exclusive create, so a jail is visible only when it is complete.

use crate::error::{Error, Result, cleanup_failure};
use crate::host::Host;
use crate::jail::record::validate_extra;
use crate::jail::{CreateTracker, DeleteTracker, JailLayout, JailRecord, validate_name};
use crate::manifest::JailconfConfig;
use crate::provision::BaseStore;
use crate::reconcile;
use crate::release::check_label;
use crate::roster::Roster;
use crate::slot::{ConfDir, ConfEntry, ConfName, next_slot, next_slot_excluding};
use crate::template::Template;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// How a new jail gets its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRequest {
    /// Lowest free slot in the config directory
    Allocate,
    /// Slot fixed by the caller (roster entries, `--slot`)
    Declared(u32),
}

/// Parameters for creating a jail
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: String,
    pub version: String,
    pub slot: SlotRequest,
    pub extra: BTreeMap<String, String>,
}

/// Parameters for deleting a jail
#[derive(Debug, Clone, Default)]
pub struct DeleteRequest {
    pub name: String,
    /// Skip the confirmation prompt
    pub force: bool,
    /// Version the jail was created from, if the template needs it
    pub version: Option<String>,
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug)]
pub enum CreateOutcome {
    Created(JailRecord),
    /// Config on disk already matches; nothing was touched
    AlreadySatisfied(JailRecord),
}

#[derive(Debug)]
pub enum DeleteOutcome {
    Deleted(JailRecord),
    Cancelled(JailRecord),
}

/// Result of checking one jail against its render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Match,
    Drift,
    /// Declared in the roster but no config on disk
    Missing,
    /// Could not be rendered (unknown version, out-of-range slot, ...)
    Unverifiable,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub name: String,
    pub slot: u32,
    pub path: Option<PathBuf>,
    pub status: VerifyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Runs jail operations against one host layout
pub struct Lifecycle<H: Host> {
    layout: JailLayout,
    template: Template,
    bases: BaseStore,
    host: H,
}

impl<H: Host> Lifecycle<H> {
    pub fn new(layout: JailLayout, template: Template, bases: BaseStore, host: H) -> Self {
        Self {
            layout,
            template,
            bases,
            host,
        }
    }

    pub fn from_config(config: &JailconfConfig, host: H) -> Result<Self> {
        Ok(Self::new(
            JailLayout::from_config(config)?,
            Template::load(config.paths.template.as_deref())?,
            BaseStore::from_config(config),
            host,
        ))
    }

    fn conf_dir(&self) -> &ConfDir {
        self.layout.conf_dir()
    }

    /// Scan the config directory, refusing to work on a listing with duplicate slots
    fn scan(&self) -> Result<Vec<ConfEntry>> {
        let names = self.conf_dir().names()?;
        next_slot(&names)?;
        self.conf_dir().scan()
    }

    /// Slots allocation must never hand out
    fn reserved_slots(&self) -> Vec<u32> {
        self.layout.plan().gateway_slot().into_iter().collect()
    }

    /// Slot the next allocating create would use
    pub fn next_slot(&self) -> Result<u32> {
        self.conf_dir().next_slot(&self.reserved_slots())
    }

    /// Create a jail
    pub fn create(&self, req: &CreateRequest) -> Result<CreateOutcome> {
        let mut tracker = CreateTracker::new(&req.name);

        validate_name(&req.name)?;
        check_label(&req.version)?;
        validate_extra(&req.name, &req.extra)?;
        if req.slot == SlotRequest::Declared(0) {
            return Err(Error::InvalidSlot {
                slot: 0,
                reason: "slots start at 1".into(),
            });
        }

        let archive = self.bases.require(&req.version)?;
        tracker.validated()?;

        let entries = self.scan()?;
        let existing = ConfDir::find_in(&entries, &req.name)?;

        let slot = match (req.slot, &existing) {
            // Same name again: re-check the config it already has
            (SlotRequest::Allocate, Some(entry)) => entry.slot,
            (SlotRequest::Allocate, None) => next_slot_excluding(
                entries.iter().map(|e| ConfName::filename(e.slot, &e.name)),
                &self.reserved_slots(),
            )?,
            (SlotRequest::Declared(slot), Some(entry)) if entry.slot != slot => {
                return Err(Error::JailExists {
                    name: req.name.clone(),
                    slot: entry.slot,
                });
            }
            (SlotRequest::Declared(slot), _) => {
                if let Some(other) = self.conf_dir().find_slot(slot)?
                    && other.name != req.name
                {
                    return Err(Error::SlotTaken {
                        slot,
                        name: other.name,
                    });
                }
                slot
            }
        };

        let record = self.layout.record(
            &req.name,
            slot,
            Some(req.version.clone()),
            req.extra.clone(),
        )?;
        self.template.check(&record.context())?;
        let rendered = reconcile::render(&self.template, &record)?;
        tracker.allocated()?;

        if reconcile::check_create(&record, &rendered)? {
            tracker.skipped()?;
            tracing::info!(jail = %record.name, slot = record.slot, "config already in place");
            return Ok(CreateOutcome::AlreadySatisfied(record));
        }

        if record.root_path.exists() {
            return Err(Error::RootExists(record.root_path.clone()));
        }

        fs::create_dir(&record.root_path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::DirectoryMissing(self.layout.root_dir().to_path_buf()),
            io::ErrorKind::AlreadyExists => Error::RootExists(record.root_path.clone()),
            _ => Error::Fs {
                op: "create",
                path: record.root_path.clone(),
                source: e,
            },
        })?;
        tracker.rooted()?;

        let result = self
            .host
            .extract(&archive, &record.root_path)
            .and_then(|_| tracker.extracted())
            .and_then(|_| write_conf(&record.conf_path, &rendered))
            .and_then(|_| tracker.committed());

        match result {
            Ok(()) => {
                tracing::info!(
                    jail = %record.name,
                    slot = record.slot,
                    conf = %record.conf_path.display(),
                    "jail created"
                );
                Ok(CreateOutcome::Created(record))
            }
            Err(e) => Err(self.abandon_create(&mut tracker, &record, e)),
        }
    }

    /// Undo whatever the create made, keeping the original error
    fn abandon_create(&self, tracker: &mut CreateTracker, record: &JailRecord, err: Error) -> Error {
        let phase = tracker.phase();
        if let Err(e) = tracker.failed() {
            tracing::warn!(jail = %record.name, error = %e, "could not record failure");
        }
        if !phase.owns_root() {
            return err;
        }

        tracing::debug!(jail = %record.name, root = %record.root_path.display(), "removing partial root");
        if let Err(e) = self.host.clear_flags(&record.root_path) {
            tracing::warn!(root = %record.root_path.display(), error = %e, "failed to clear flags");
        }
        let removed = fs::remove_dir_all(&record.root_path);
        err.with_cleanup_failures(cleanup_failure(&record.root_path, removed).into_iter().collect())
    }

    /// Delete a jail
    pub fn delete(&self, req: &DeleteRequest) -> Result<DeleteOutcome> {
        let mut tracker = DeleteTracker::new(&req.name);
        let result = self.delete_tracked(&mut tracker, req);

        if result.is_err()
            && !tracker.phase().is_destructive()
            && let Err(e) = tracker.aborted()
        {
            tracing::debug!(jail = %req.name, error = %e, "could not record abort");
        }
        result
    }

    fn delete_tracked(&self, tracker: &mut DeleteTracker, req: &DeleteRequest) -> Result<DeleteOutcome> {
        validate_name(&req.name)?;
        if let Some(version) = &req.version {
            check_label(version)?;
        }

        let entry = self
            .conf_dir()
            .find(&req.name)?
            .ok_or_else(|| Error::JailNotFound(req.name.clone()))?;
        tracker.located()?;

        let record =
            self.layout
                .record(&req.name, entry.slot, req.version.clone(), req.extra.clone())?;
        self.template.check(&record.context())?;
        let rendered = reconcile::render(&self.template, &record)?;
        reconcile::check_delete(&record, &rendered)?;
        tracker.verified()?;

        if !req.force {
            let question = format!(
                "Are you sure you want to delete jail '{}'? This action cannot be undone.",
                record.name
            );
            if !self.host.confirm(&question)? {
                tracker.cancelled()?;
                return Ok(DeleteOutcome::Cancelled(record));
            }
        }
        tracker.confirmed()?;

        fs::remove_file(&record.conf_path).map_err(Error::fs("remove", &record.conf_path))?;
        tracker.unlinked()?;
        tracing::info!(jail = %record.name, conf = %record.conf_path.display(), "config removed");

        if record.root_path.exists() {
            if let Err(e) = self.host.clear_flags(&record.root_path) {
                tracing::warn!(root = %record.root_path.display(), error = %e, "failed to clear flags");
            }
            fs::remove_dir_all(&record.root_path).map_err(Error::fs("remove", &record.root_path))?;
            tracing::info!(jail = %record.name, root = %record.root_path.display(), "root removed");
        } else {
            tracing::warn!(root = %record.root_path.display(), "jail root already gone");
        }
        tracker.purged()?;

        Ok(DeleteOutcome::Deleted(record))
    }

    /// Create every roster entry with its declared slot, in document order
    ///
    /// Stops at the first failure; jails created before it are kept.
    pub fn apply(&self, roster: &Roster) -> Result<Vec<CreateOutcome>> {
        let mut outcomes = Vec::with_capacity(roster.jails.len());
        for spec in &roster.jails {
            let outcome = self.create(&CreateRequest {
                name: spec.name.clone(),
                version: spec.version.clone(),
                slot: SlotRequest::Declared(spec.slot),
                extra: spec.extra.clone(),
            })?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Records for every jail on disk, sorted by slot
    ///
    /// Files whose slot or name cannot produce a record are skipped with a
    /// warning; `verify` reports them.
    pub fn list(&self) -> Result<Vec<JailRecord>> {
        let records = self
            .scan()?
            .into_iter()
            .filter_map(|e| match self.layout.record(&e.name, e.slot, None, BTreeMap::new()) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::warn!(conf = %e.path.display(), error = %err, "skipping config");
                    None
                }
            })
            .collect();
        Ok(records)
    }

    /// Compare every jail on disk (and every roster entry) with its render
    pub fn verify(&self, roster: Option<&Roster>) -> Result<Vec<VerifyReport>> {
        let entries = self.scan()?;
        let mut reports = Vec::with_capacity(entries.len());

        for entry in &entries {
            let spec = roster.and_then(|r| r.find(&entry.name));
            let report = match spec {
                Some(spec) if spec.slot != entry.slot => VerifyReport {
                    name: entry.name.clone(),
                    slot: entry.slot,
                    path: Some(entry.path.clone()),
                    status: VerifyStatus::Drift,
                    detail: Some(format!("declared slot {}, found {}", spec.slot, entry.slot)),
                },
                _ => self.verify_entry(
                    entry,
                    spec.map(|s| s.version.clone()),
                    spec.map(|s| s.extra.clone()).unwrap_or_default(),
                )?,
            };
            reports.push(report);
        }

        if let Some(roster) = roster {
            for spec in &roster.jails {
                if ConfDir::find_in(&entries, &spec.name)?.is_none() {
                    reports.push(VerifyReport {
                        name: spec.name.clone(),
                        slot: spec.slot,
                        path: None,
                        status: VerifyStatus::Missing,
                        detail: None,
                    });
                }
            }
        }

        Ok(reports)
    }

    fn verify_entry(
        &self,
        entry: &ConfEntry,
        version: Option<String>,
        extra: BTreeMap<String, String>,
    ) -> Result<VerifyReport> {
        let unverifiable = |e: Error| VerifyReport {
            name: entry.name.clone(),
            slot: entry.slot,
            path: Some(entry.path.clone()),
            status: VerifyStatus::Unverifiable,
            detail: Some(e.to_string()),
        };

        let record = match self.layout.record(&entry.name, entry.slot, version, extra) {
            Ok(record) => record,
            Err(e) => return Ok(unverifiable(e)),
        };
        let rendered = match reconcile::render(&self.template, &record) {
            Ok(rendered) => rendered,
            Err(e) => return Ok(unverifiable(e)),
        };

        let status = if reconcile::compare(&rendered, &entry.path)? {
            VerifyStatus::Match
        } else {
            VerifyStatus::Drift
        };

        Ok(VerifyReport {
            name: entry.name.clone(),
            slot: entry.slot,
            path: Some(entry.path.clone()),
            status,
            detail: None,
        })
    }
}

/// Write a config file that must not exist yet
fn write_conf(path: &Path, rendered: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => Error::ConfExists(path.to_path_buf()),
            _ => Error::fs("create", path)(e),
        })?;

    if let Err(e) = file.write_all(rendered).and_then(|_| file.sync_all()) {
        drop(file);
        let removed = fs::remove_file(path);
        return Err(Error::fs("write", path)(e)
            .with_cleanup_failures(cleanup_failure(path, removed).into_iter().collect()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{RetryConfig, RootLayout};
    use crate::network::AddressPlan;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeHost {
        calls: RefCell<Vec<String>>,
        fail_extract: bool,
        fail_flags: bool,
        deny: bool,
    }

    impl Host for FakeHost {
        fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("extract {} {}", archive.display(), dest.display()));
            fs::create_dir_all(dest.join("bin"))?;
            fs::write(dest.join("bin/sh"), b"#!")?;
            if self.fail_extract {
                return Err(Error::ExtractionFailed("truncated archive".into()));
            }
            Ok(())
        }

        fn clear_flags(&self, path: &Path) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("clear_flags {}", path.display()));
            if self.fail_flags {
                return Err(Error::FlagClearFailed("operation not permitted".into()));
            }
            Ok(())
        }

        fn confirm(&self, question: &str) -> Result<bool> {
            self.calls.borrow_mut().push(format!("confirm {}", question));
            Ok(!self.deny)
        }
    }

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            for sub in ["conf.d", "jails", "base/14.1-RELEASE"] {
                fs::create_dir_all(dir.path().join(sub)).unwrap();
            }
            fs::write(dir.path().join("base/14.1-RELEASE/base.txz"), b"xz").unwrap();
            Self { dir }
        }

        fn conf_dir(&self) -> PathBuf {
            self.dir.path().join("conf.d")
        }

        fn root_dir(&self) -> PathBuf {
            self.dir.path().join("jails")
        }

        fn lifecycle(&self, host: FakeHost) -> Lifecycle<FakeHost> {
            self.lifecycle_with(host, Template::builtin().unwrap())
        }

        fn lifecycle_with(&self, host: FakeHost, template: Template) -> Lifecycle<FakeHost> {
            let plan =
                AddressPlan::new("192.168.2.0/24".parse().unwrap(), 10, None, "bridge0", "epair")
                    .unwrap();
            self.lifecycle_on(host, template, plan)
        }

        fn lifecycle_on(
            &self,
            host: FakeHost,
            template: Template,
            plan: AddressPlan,
        ) -> Lifecycle<FakeHost> {
            let layout = JailLayout::new(self.conf_dir(), self.root_dir(), RootLayout::Name, plan);
            let bases = BaseStore::new(
                "https://download.freebsd.org/releases",
                self.dir.path().join("base"),
                "base",
                RetryConfig::default(),
            );
            Lifecycle::new(layout, template, bases, host)
        }

        fn listing(&self) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(self.conf_dir())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    fn create_req(name: &str, slot: SlotRequest) -> CreateRequest {
        CreateRequest {
            name: name.into(),
            version: "14.1-RELEASE".into(),
            slot,
            extra: BTreeMap::new(),
        }
    }

    fn delete_req(name: &str, force: bool) -> DeleteRequest {
        DeleteRequest {
            name: name.into(),
            force,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_allocates_and_writes() {
        let fx = Fixture::new();
        fs::write(fx.conf_dir().join("1-a.conf"), b"a {}\n").unwrap();
        fs::write(fx.conf_dir().join("3-c.conf"), b"c {}\n").unwrap();
        let lc = fx.lifecycle(FakeHost::default());

        let outcome = lc.create(&create_req("web1", SlotRequest::Allocate)).unwrap();
        let CreateOutcome::Created(record) = outcome else {
            panic!("expected a new jail");
        };
        assert_eq!(record.slot, 2);
        assert_eq!(record.conf_path, fx.conf_dir().join("2-web1.conf"));
        assert!(fx.root_dir().join("web1/bin/sh").exists());

        let written = fs::read(&record.conf_path).unwrap();
        let expected = reconcile::render(&Template::builtin().unwrap(), &record).unwrap();
        assert_eq!(written, expected);
        assert_eq!(lc.next_slot().unwrap(), 4);
    }

    #[test]
    fn test_allocation_skips_gateway_slot() {
        let fx = Fixture::new();
        let plan =
            AddressPlan::new("192.168.2.0/24".parse().unwrap(), 0, None, "bridge0", "epair")
                .unwrap();
        let lc = fx.lifecycle_on(FakeHost::default(), Template::builtin().unwrap(), plan);
        assert_eq!(lc.next_slot().unwrap(), 2);

        let CreateOutcome::Created(web) = lc.create(&create_req("web", SlotRequest::Allocate)).unwrap()
        else {
            panic!("expected a new jail");
        };
        assert_eq!(web.slot, 2);
        assert_eq!(web.identity.ip_addr.to_string(), "192.168.2.2");

        let CreateOutcome::Created(db) = lc.create(&create_req("db", SlotRequest::Allocate)).unwrap()
        else {
            panic!("expected a new jail");
        };
        assert_eq!(db.slot, 3);

        assert!(matches!(
            lc.create(&create_req("mail", SlotRequest::Declared(1))),
            Err(Error::InvalidSlot { slot: 1, .. })
        ));
        assert_eq!(fx.listing(), vec!["2-web.conf", "3-db.conf"]);
    }

    #[test]
    fn test_create_is_idempotent() {
        let fx = Fixture::new();
        let host = FakeHost::default();
        let lc = fx.lifecycle(host);
        lc.create(&create_req("web1", SlotRequest::Allocate)).unwrap();
        let calls_after_first = lc.host.calls.borrow().len();

        let outcome = lc.create(&create_req("web1", SlotRequest::Allocate)).unwrap();
        assert!(matches!(outcome, CreateOutcome::AlreadySatisfied(ref r) if r.slot == 1));
        assert_eq!(lc.host.calls.borrow().len(), calls_after_first);
        assert_eq!(fx.listing(), vec!["1-web1.conf"]);
    }

    #[test]
    fn test_create_skips_matching_config_without_touching_disk() {
        let fx = Fixture::new();
        let lc = fx.lifecycle(FakeHost::default());
        let record = JailLayout::new(
            fx.conf_dir(),
            fx.root_dir(),
            RootLayout::Name,
            AddressPlan::new("192.168.2.0/24".parse().unwrap(), 10, None, "bridge0", "epair")
                .unwrap(),
        )
        .record("web1", 1, Some("14.1-RELEASE".into()), BTreeMap::new())
        .unwrap();
        let rendered = reconcile::render(&Template::builtin().unwrap(), &record).unwrap();
        fs::write(&record.conf_path, &rendered).unwrap();

        let outcome = lc.create(&create_req("web1", SlotRequest::Declared(1))).unwrap();
        assert!(matches!(outcome, CreateOutcome::AlreadySatisfied(_)));
        assert!(lc.host.calls.borrow().is_empty());
        assert!(!fx.root_dir().join("web1").exists());
        assert_eq!(fs::read(&record.conf_path).unwrap(), rendered);
    }

    #[test]
    fn test_create_refuses_drifted_config() {
        let fx = Fixture::new();
        fs::write(fx.conf_dir().join("1-web1.conf"), b"web1 { persist; }\n").unwrap();
        let lc = fx.lifecycle(FakeHost::default());

        let err = lc.create(&create_req("web1", SlotRequest::Allocate)).unwrap_err();
        assert!(matches!(err, Error::ConfigDrift { .. }));
        assert_eq!(
            fs::read(fx.conf_dir().join("1-web1.conf")).unwrap(),
            b"web1 { persist; }\n"
        );
        assert!(!fx.root_dir().join("web1").exists());
    }

    #[test]
    fn test_create_name_under_other_slot() {
        let fx = Fixture::new();
        fs::write(fx.conf_dir().join("2-web1.conf"), b"web1 {}\n").unwrap();
        let lc = fx.lifecycle(FakeHost::default());

        let err = lc.create(&create_req("web1", SlotRequest::Declared(5))).unwrap_err();
        assert!(matches!(err, Error::JailExists { slot: 2, .. }));
        assert!(!fx.root_dir().join("web1").exists());
        assert!(lc.host.calls.borrow().is_empty());
    }

    #[test]
    fn test_create_slot_taken() {
        let fx = Fixture::new();
        fs::write(fx.conf_dir().join("5-db.conf"), b"db {}\n").unwrap();
        let lc = fx.lifecycle(FakeHost::default());

        let err = lc.create(&create_req("web1", SlotRequest::Declared(5))).unwrap_err();
        assert!(matches!(err, Error::SlotTaken { slot: 5, ref name } if name == "db"));
    }

    #[test]
    fn test_create_missing_base_archive() {
        let fx = Fixture::new();
        let lc = fx.lifecycle(FakeHost::default());
        let mut req = create_req("web1", SlotRequest::Allocate);
        req.version = "13.4-RELEASE".into();

        assert!(matches!(lc.create(&req), Err(Error::BaseArchiveNotFound { .. })));
        assert!(fx.listing().is_empty());
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let fx = Fixture::new();
        let lc = fx.lifecycle(FakeHost::default());

        assert!(matches!(
            lc.create(&create_req("web.1", SlotRequest::Allocate)),
            Err(Error::InvalidName { .. })
        ));
        assert!(matches!(
            lc.create(&create_req("web1", SlotRequest::Declared(0))),
            Err(Error::InvalidSlot { slot: 0, .. })
        ));
        assert!(matches!(
            lc.create(&create_req("web1", SlotRequest::Declared(245))),
            Err(Error::InvalidSlot { slot: 245, .. })
        ));
        let mut req = create_req("web1", SlotRequest::Allocate);
        req.version = String::new();
        assert!(matches!(lc.create(&req), Err(Error::Validation(_))));
        assert!(fs::read_dir(fx.root_dir()).unwrap().next().is_none());
    }

    #[test]
    fn test_create_template_field_checked_before_disk() {
        let fx = Fixture::new();
        let template = Template::parse("{{ name }} { $owner = \"{{ owner }}\"; }\n").unwrap();
        let lc = fx.lifecycle_with(FakeHost::default(), template);

        let err = lc.create(&create_req("web1", SlotRequest::Allocate)).unwrap_err();
        assert!(matches!(err, Error::TemplateField { ref field, .. } if field == "owner"));
        assert!(!fx.root_dir().join("web1").exists());

        let mut req = create_req("web1", SlotRequest::Allocate);
        req.extra.insert("owner".into(), "ops".into());
        assert!(matches!(lc.create(&req).unwrap(), CreateOutcome::Created(_)));
        assert_eq!(
            fs::read_to_string(fx.conf_dir().join("1-web1.conf")).unwrap(),
            "web1 { $owner = \"ops\"; }\n"
        );
    }

    #[test]
    fn test_create_extraction_failure_cleans_up() {
        let fx = Fixture::new();
        let lc = fx.lifecycle(FakeHost {
            fail_extract: true,
            ..Default::default()
        });

        let err = lc.create(&create_req("web1", SlotRequest::Allocate)).unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed(_)));
        assert!(!fx.root_dir().join("web1").exists());
        assert!(fx.listing().is_empty());
        let calls = lc.host.calls.borrow();
        assert!(calls.iter().any(|c| c.starts_with("clear_flags")));
    }

    #[test]
    fn test_create_conf_race_cleans_up_root() {
        let fx = Fixture::new();
        let template = Template::parse("{{ name }} {}\n").unwrap();

        struct RacingHost {
            conf: PathBuf,
        }
        impl Host for RacingHost {
            fn extract(&self, _archive: &Path, _dest: &Path) -> Result<()> {
                // Another invocation writes the same config mid-create
                fs::write(&self.conf, b"web1 {}\n")?;
                Ok(())
            }
            fn clear_flags(&self, _path: &Path) -> Result<()> {
                Ok(())
            }
            fn confirm(&self, _question: &str) -> Result<bool> {
                Ok(true)
            }
        }

        let plan =
            AddressPlan::new("192.168.2.0/24".parse().unwrap(), 10, None, "bridge0", "epair")
                .unwrap();
        let lc = Lifecycle::new(
            JailLayout::new(fx.conf_dir(), fx.root_dir(), RootLayout::Name, plan),
            template,
            BaseStore::new("", fx.dir.path().join("base"), "base", RetryConfig::default()),
            RacingHost {
                conf: fx.conf_dir().join("1-web1.conf"),
            },
        );

        let err = lc.create(&create_req("web1", SlotRequest::Allocate)).unwrap_err();
        assert!(matches!(err, Error::ConfExists(_)));
        assert!(!fx.root_dir().join("web1").exists());
        assert_eq!(fs::read(fx.conf_dir().join("1-web1.conf")).unwrap(), b"web1 {}\n");
    }

    #[test]
    fn test_create_existing_root_without_config() {
        let fx = Fixture::new();
        fs::create_dir(fx.root_dir().join("web1")).unwrap();
        fs::write(fx.root_dir().join("web1/keep"), b"data").unwrap();
        let lc = fx.lifecycle(FakeHost::default());

        let err = lc.create(&create_req("web1", SlotRequest::Allocate)).unwrap_err();
        assert!(matches!(err, Error::RootExists(_)));
        assert!(fx.root_dir().join("web1/keep").exists());
    }

    #[test]
    fn test_create_duplicate_slots_on_disk() {
        let fx = Fixture::new();
        fs::write(fx.conf_dir().join("1-a.conf"), b"").unwrap();
        fs::write(fx.conf_dir().join("1-b.conf"), b"").unwrap();
        let lc = fx.lifecycle(FakeHost::default());

        let err = lc.create(&create_req("web1", SlotRequest::Allocate)).unwrap_err();
        assert!(matches!(err, Error::DataConsistency(_)));
    }

    #[test]
    fn test_delete_removes_config_and_root() {
        let fx = Fixture::new();
        let lc = fx.lifecycle(FakeHost::default());
        lc.create(&create_req("web1", SlotRequest::Allocate)).unwrap();

        let outcome = lc.delete(&delete_req("web1", true)).unwrap();
        assert!(matches!(outcome, DeleteOutcome::Deleted(_)));
        assert!(fx.listing().is_empty());
        assert!(!fx.root_dir().join("web1").exists());
        assert!(!lc.host.calls.borrow().iter().any(|c| c.starts_with("confirm")));
    }

    #[test]
    fn test_delete_refuses_hand_edited_config() {
        let fx = Fixture::new();
        let lc = fx.lifecycle(FakeHost::default());
        lc.create(&create_req("web1", SlotRequest::Allocate)).unwrap();

        let conf = fx.conf_dir().join("1-web1.conf");
        let mut edited = fs::read(&conf).unwrap();
        edited.extend_from_slice(b"# allow.raw_sockets;\n");
        fs::write(&conf, &edited).unwrap();

        let err = lc.delete(&delete_req("web1", true)).unwrap_err();
        assert!(matches!(err, Error::ConfigDrift { .. }));
        assert_eq!(fs::read(&conf).unwrap(), edited);
        assert!(fx.root_dir().join("web1/bin/sh").exists());
    }

    #[test]
    fn test_delete_cancelled() {
        let fx = Fixture::new();
        fx.lifecycle(FakeHost::default())
            .create(&create_req("web1", SlotRequest::Allocate))
            .unwrap();

        let lc = fx.lifecycle(FakeHost {
            deny: true,
            ..Default::default()
        });
        let outcome = lc.delete(&delete_req("web1", false)).unwrap();
        assert!(matches!(outcome, DeleteOutcome::Cancelled(_)));
        assert_eq!(fx.listing(), vec!["1-web1.conf"]);
        assert!(fx.root_dir().join("web1").exists());
    }

    #[test]
    fn test_delete_flag_failure_is_only_a_warning() {
        let fx = Fixture::new();
        fx.lifecycle(FakeHost::default())
            .create(&create_req("web1", SlotRequest::Allocate))
            .unwrap();

        let lc = fx.lifecycle(FakeHost {
            fail_flags: true,
            ..Default::default()
        });
        assert!(matches!(
            lc.delete(&delete_req("web1", true)).unwrap(),
            DeleteOutcome::Deleted(_)
        ));
        assert!(!fx.root_dir().join("web1").exists());
    }

    #[test]
    fn test_delete_root_failure_names_path() {
        let fx = Fixture::new();
        let lc = fx.lifecycle(FakeHost::default());
        lc.create(&create_req("web1", SlotRequest::Allocate)).unwrap();

        // A plain file where the root directory should be cannot be removed as a tree
        let root = fx.root_dir().join("web1");
        fs::remove_dir_all(&root).unwrap();
        fs::write(&root, b"not a directory").unwrap();

        let err = lc.delete(&delete_req("web1", true)).unwrap_err();
        match &err {
            Error::Fs { op, path, .. } => {
                assert_eq!(*op, "remove");
                assert_eq!(path, &root);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().contains(&root.display().to_string()));
        assert!(fx.listing().is_empty());
    }

    #[test]
    fn test_delete_unknown_jail() {
        let fx = Fixture::new();
        let lc = fx.lifecycle(FakeHost::default());
        assert!(matches!(
            lc.delete(&delete_req("ghost", true)),
            Err(Error::JailNotFound(_))
        ));
    }

    #[test]
    fn test_delete_needs_version_when_template_uses_it() {
        let fx = Fixture::new();
        let template = Template::parse("{{ name }} { # {{ version }}\n}\n").unwrap();
        fx.lifecycle_with(FakeHost::default(), template.clone())
            .create(&create_req("web1", SlotRequest::Allocate))
            .unwrap();

        let lc = fx.lifecycle_with(FakeHost::default(), template);
        let err = lc.delete(&delete_req("web1", true)).unwrap_err();
        assert!(matches!(err, Error::TemplateField { ref field, .. } if field == "version"));
        assert_eq!(fx.listing(), vec!["1-web1.conf"]);

        let mut req = delete_req("web1", true);
        req.version = Some("14.1-RELEASE".into());
        assert!(matches!(lc.delete(&req).unwrap(), DeleteOutcome::Deleted(_)));
    }

    #[test]
    fn test_apply_roster_in_order() {
        let fx = Fixture::new();
        let lc = fx.lifecycle(FakeHost::default());
        let roster = Roster::from_toml_str(
            r#"
[[jails]]
name = "web"
slot = 4
version = "14.1-RELEASE"

[[jails]]
name = "db"
slot = 2
version = "14.1-RELEASE"
"#,
        )
        .unwrap();

        let outcomes = lc.apply(&roster).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(fx.listing(), vec!["2-db.conf", "4-web.conf"]);

        // Second run is a no-op
        let outcomes = lc.apply(&roster).unwrap();
        assert!(outcomes.iter().all(|o| matches!(o, CreateOutcome::AlreadySatisfied(_))));
    }

    #[test]
    fn test_apply_stops_at_first_error() {
        let fx = Fixture::new();
        fs::write(fx.conf_dir().join("1-other.conf"), b"").unwrap();
        let lc = fx.lifecycle(FakeHost::default());
        let roster = Roster::from_json_str(
            r#"{"jails": [
                {"name": "web", "slot": 2, "version": "14.1-RELEASE"},
                {"name": "db", "slot": 1, "version": "14.1-RELEASE"},
                {"name": "mail", "slot": 3, "version": "14.1-RELEASE"}
            ]}"#,
        )
        .unwrap();

        assert!(matches!(lc.apply(&roster), Err(Error::SlotTaken { slot: 1, .. })));
        assert_eq!(fx.listing(), vec!["1-other.conf", "2-web.conf"]);
    }

    #[test]
    fn test_list_and_verify() {
        let fx = Fixture::new();
        let lc = fx.lifecycle(FakeHost::default());
        lc.create(&create_req("web", SlotRequest::Allocate)).unwrap();
        lc.create(&create_req("db", SlotRequest::Allocate)).unwrap();
        fs::write(fx.conf_dir().join("2-db.conf"), b"db { persist; }\n").unwrap();

        let names: Vec<String> = lc.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["web", "db"]);

        let reports = lc.verify(None).unwrap();
        assert_eq!(reports[0].status, VerifyStatus::Match);
        assert_eq!(reports[1].status, VerifyStatus::Drift);

        let roster = Roster::from_json_str(
            r#"{"jails": [
                {"name": "web", "slot": 1, "version": "14.1-RELEASE"},
                {"name": "mail", "slot": 3, "version": "14.1-RELEASE"}
            ]}"#,
        )
        .unwrap();
        let reports = lc.verify(Some(&roster)).unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[2].name, "mail");
        assert_eq!(reports[2].status, VerifyStatus::Missing);
    }

    #[test]
    fn test_list_skips_entries_without_identity() {
        let fx = Fixture::new();
        let lc = fx.lifecycle(FakeHost::default());
        lc.create(&create_req("web", SlotRequest::Allocate)).unwrap();
        fs::write(fx.conf_dir().join("300-legacy.conf"), b"legacy {}\n").unwrap();
        fs::write(fx.conf_dir().join("7-old.site.conf"), b"old {}\n").unwrap();

        let names: Vec<String> = lc.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["web"]);

        let reports = lc.verify(None).unwrap();
        assert_eq!(reports.len(), 3);
        assert!(
            reports
                .iter()
                .filter(|r| r.name != "web")
                .all(|r| r.status == VerifyStatus::Unverifiable)
        );
    }

    #[test]
    fn test_verify_unknown_version_is_unverifiable() {
        let fx = Fixture::new();
        let template = Template::parse("{{ name }} # {{ version }}\n").unwrap();
        let lc = fx.lifecycle_with(FakeHost::default(), template);
        lc.create(&create_req("web", SlotRequest::Allocate)).unwrap();

        let reports = lc.verify(None).unwrap();
        assert_eq!(reports[0].status, VerifyStatus::Unverifiable);
        assert!(reports[0].detail.as_deref().unwrap_or("").contains("version"));
    }

    #[test]
    fn test_missing_conf_dir() {
        let fx = Fixture::new();
        fs::remove_dir(fx.conf_dir()).unwrap();
        let lc = fx.lifecycle(FakeHost::default());
        assert!(matches!(
            lc.create(&create_req("web", SlotRequest::Allocate)),
            Err(Error::DirectoryMissing(_))
        ));
        assert!(matches!(lc.list(), Err(Error::DirectoryMissing(_))));
    }
}
