// ── Transactional config store ──
//
// Each loaded package keeps two copies: the last committed state and a
// working copy that every mutation edits. `commit()` persists dirty working
// copies via temp-file + rename; `revert()` drops them.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::ConfigError;
use crate::uci::{OptionValue, Package, Section};

#[derive(Debug, Clone)]
struct Entry {
    committed: Package,
    working: Package,
    dirty: bool,
    /// Bumped on every edit of `working`; lets a commit tell whether the
    /// snapshot it wrote is still current.
    revision: u64,
}

impl Entry {
    fn new(package: Package) -> Self {
        Self {
            committed: package.clone(),
            working: package,
            dirty: false,
            revision: 0,
        }
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.revision += 1;
    }
}

/// UCI-like store rooted at a directory (usually `/etc/config`).
///
/// Readers share the lock; every mutation and revert takes it exclusively.
/// Commits serialize a snapshot under the lock and write files outside it,
/// so a slow flash sync never blocks readers.
#[derive(Debug)]
pub struct ConfigStore {
    root: PathBuf,
    packages: RwLock<BTreeMap<String, Entry>>,
    commit_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            packages: RwLock::new(BTreeMap::new()),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, config: &str) -> PathBuf {
        self.root.join(config)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Entry>> {
        self.packages.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Entry>> {
        self.packages.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Loading ──────────────────────────────────────────────────────

    /// Read `<root>/<config>` from disk, replacing any in-memory state for
    /// it (pending changes included). A missing file loads as empty.
    pub fn load(&self, config: &str) -> Result<(), ConfigError> {
        validate_name(config)?;
        let path = self.path_for(config);

        let package = match std::fs::read_to_string(&path) {
            Ok(text) => Package::parse(&text).map_err(|source| ConfigError::Parse {
                config: config.to_owned(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file missing, starting empty");
                Package::new()
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        let mut packages = self.write();
        let revision = packages.get(config).map_or(0, |old| old.revision + 1);
        packages.insert(config.to_owned(), Entry { revision, ..Entry::new(package) });
        Ok(())
    }

    /// Load `config` unless it is already held in memory.
    pub fn ensure_loaded(&self, config: &str) -> Result<(), ConfigError> {
        if self.read().contains_key(config) {
            return Ok(());
        }
        self.load(config)
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Values of `key`, or `None` when the config, section or key is absent.
    /// Reads see pending (uncommitted) mutations.
    pub fn get(&self, config: &str, section: &str, key: &str) -> Option<Vec<String>> {
        let packages = self.read();
        let value = packages.get(config)?.working.section(section)?.get(key)?;
        Some(value.as_slice().to_vec())
    }

    /// Raw option value, preserving the single/list distinction.
    pub fn get_value(&self, config: &str, section: &str, key: &str) -> Option<OptionValue> {
        let packages = self.read();
        packages
            .get(config)?
            .working
            .section(section)?
            .get(key)
            .cloned()
    }

    /// First value of `key`: the option itself or the head of a list.
    pub fn get_first(&self, config: &str, section: &str, key: &str) -> Option<String> {
        self.get(config, section, key)
            .and_then(|values| values.into_iter().next())
    }

    pub fn section(&self, config: &str, section: &str) -> Option<Section> {
        self.read().get(config)?.working.section(section).cloned()
    }

    /// All sections of `config` in file order, optionally filtered by type.
    pub fn sections(&self, config: &str, section_type: Option<&str>) -> Vec<Section> {
        let packages = self.read();
        let Some(entry) = packages.get(config) else {
            return Vec::new();
        };
        entry
            .working
            .sections()
            .iter()
            .filter(|s| section_type.is_none_or(|t| s.section_type == t))
            .cloned()
            .collect()
    }

    /// Names of configs with uncommitted changes.
    pub fn changes(&self) -> Vec<String> {
        self.read()
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(name, _)| name.clone())
            .collect()
    }

    // ── Mutations ────────────────────────────────────────────────────
    //
    // Every mutator loads its config from disk first when it is not yet in
    // memory, so a commit never replaces a file with a partial package.

    /// `ensure_loaded` for the `bool`-returning mutators.
    fn auto_load(&self, config: &str) -> bool {
        match self.ensure_loaded(config) {
            Ok(()) => true,
            Err(e) => {
                warn!(config, error = %e, "cannot load config for update");
                false
            }
        }
    }

    /// Store `values` under `key`. One value writes a single option, more
    /// than one writes a list, none removes the key.
    ///
    /// A missing named section is created with type equal to its name; an
    /// index selector that resolves to nothing leaves the store unchanged and
    /// returns `false`, as does a config that cannot be loaded.
    pub fn set<I, S>(&self, config: &str, section: &str, key: &str, values: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if key.is_empty() || validate_name(config).is_err() || !self.auto_load(config) {
            return false;
        }
        let mut values: Vec<String> = values.into_iter().map(Into::into).collect();
        let new_value = match values.len() {
            0 => return self.del(config, section, key),
            1 => OptionValue::Single(values.remove(0)),
            _ => OptionValue::List(values),
        };

        let mut packages = self.write();
        let Some(entry) = packages.get_mut(config) else {
            return false;
        };
        let Some(target) = entry.working.section_or_create(section) else {
            return false;
        };
        if target.options.get(key) != Some(&new_value) {
            target.options.insert(key.to_owned(), new_value);
            entry.touch();
        }
        true
    }

    /// Append one value to a list option, converting a single option into
    /// a two-element list.
    pub fn add_list(&self, config: &str, section: &str, key: &str, value: impl Into<String>) -> bool {
        if key.is_empty() || validate_name(config).is_err() || !self.auto_load(config) {
            return false;
        }
        let value = value.into();
        let mut packages = self.write();
        let Some(entry) = packages.get_mut(config) else {
            return false;
        };
        let Some(target) = entry.working.section_or_create(section) else {
            return false;
        };
        let next = match target.options.shift_remove(key) {
            Some(OptionValue::List(mut values)) => {
                values.push(value);
                OptionValue::List(values)
            }
            Some(OptionValue::Single(prev)) => OptionValue::List(vec![prev, value]),
            None => OptionValue::List(vec![value]),
        };
        target.options.insert(key.to_owned(), next);
        entry.touch();
        true
    }

    /// Remove `key`. Returns whether it existed.
    pub fn del(&self, config: &str, section: &str, key: &str) -> bool {
        if validate_name(config).is_err() || !self.auto_load(config) {
            return false;
        }
        let mut packages = self.write();
        let Some(entry) = packages.get_mut(config) else {
            return false;
        };
        let Some(target) = entry.working.section_mut(section) else {
            return false;
        };
        if target.options.shift_remove(key).is_some() {
            entry.touch();
            true
        } else {
            false
        }
    }

    /// Add a named section of `section_type`.
    pub fn add_section(&self, config: &str, section: &str, section_type: &str) -> Result<(), ConfigError> {
        validate_name(config)?;
        if section.is_empty() || section.contains(['[', ']', '@']) {
            return Err(ConfigError::InvalidName(section.to_owned()));
        }
        if section_type.is_empty() {
            return Err(ConfigError::InvalidName(section_type.to_owned()));
        }
        self.ensure_loaded(config)?;

        let mut packages = self.write();
        let entry = packages
            .entry(config.to_owned())
            .or_insert_with(|| Entry::new(Package::new()));
        if entry.working.position(section).is_some() {
            return Err(ConfigError::AlreadyExists {
                config: config.to_owned(),
                section: section.to_owned(),
            });
        }
        entry
            .working
            .push_section(Section::new(section_type, Some(section.to_owned())));
        entry.touch();
        Ok(())
    }

    /// Remove a whole section. Returns whether it existed.
    pub fn del_section(&self, config: &str, section: &str) -> bool {
        if validate_name(config).is_err() || !self.auto_load(config) {
            return false;
        }
        let mut packages = self.write();
        let Some(entry) = packages.get_mut(config) else {
            return false;
        };
        if entry.working.remove_section(section).is_some() {
            entry.touch();
            true
        } else {
            false
        }
    }

    // ── Transactions ─────────────────────────────────────────────────

    /// Persist every config with pending changes.
    ///
    /// Each file is written to a temp file in the same directory, synced,
    /// then renamed over the original. A failed package stays pending; the
    /// first error is returned after the remaining packages are attempted.
    /// Edits made while the files are being written stay pending for the
    /// next commit.
    pub fn commit(&self) -> Result<(), ConfigError> {
        let _serial = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let snapshots: Vec<(String, u64, Package)> = self
            .read()
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(name, e)| (name.clone(), e.revision, e.working.clone()))
            .collect();

        let mut first_err = None;
        for (name, revision, package) in snapshots {
            let path = self.root.join(&name);
            if let Err(source) = persist(&self.root, &path, &package.to_string()) {
                warn!(config = %name, error = %source, "config commit failed");
                first_err.get_or_insert(ConfigError::Persist { path, source });
                continue;
            }

            let mut packages = self.write();
            if let Some(entry) = packages.get_mut(&name) {
                entry.dirty = entry.revision != revision;
                entry.committed = package;
            }
            debug!(config = %name, "config committed");
        }

        first_err.map_or(Ok(()), Err)
    }

    /// Discard every pending change, restoring the last committed state.
    pub fn revert(&self) {
        for entry in self.write().values_mut().filter(|e| e.dirty) {
            entry.working = entry.committed.clone();
            entry.dirty = false;
            entry.revision += 1;
        }
    }
}

fn validate_name(config: &str) -> Result<(), ConfigError> {
    let valid = !config.is_empty()
        && config
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidName(config.to_owned()))
    }
}

fn persist(dir: &Path, path: &Path, contents: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────
