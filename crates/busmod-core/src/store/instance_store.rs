// ── Durable instance store ──
//
// Owns the persistence root exclusively:
//
//   <root>/config.json                      module config
//   <root>/instances/<id>.instance.json     static record
//   <root>/instances/<id>.state.json        live entity state
//   <root>/instances/<id>.script            auxiliary
//   <root>/instances/<id>.script.state.json auxiliary
//
// Mutations serialize on one write lock. `list` takes the read side but
// reads files as they are at that moment; it is not a snapshot.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use super::artifact::{self, Artifact};
use crate::error::CoreError;
use crate::id::{generate_id, validate_id};
use crate::model::{ConfigMap, EntityState, Instance, StaticRecord};

const MODULE_CONFIG_FILE: &str = "config.json";
const INSTANCES_DIR: &str = "instances";

pub struct InstanceStore {
    root: PathBuf,
    instances_dir: PathBuf,
    lock: RwLock<()>,
}

impl InstanceStore {
    /// Open (creating if needed) the persistence root.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        let instances_dir = root.join(INSTANCES_DIR);
        std::fs::create_dir_all(&instances_dir)
            .map_err(|e| CoreError::persistence(&instances_dir, e))?;
        debug!(root = %root.display(), "instance store opened");
        Ok(Self {
            root,
            instances_dir,
            lock: RwLock::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn instances_dir(&self) -> &Path {
        &self.instances_dir
    }

    // ── Instance records ─────────────────────────────────────────────

    /// Persist an instance, generating its id when empty.
    ///
    /// Overwrites any previous record with the same id. Live state is
    /// written only when the instance carries some; an existing state
    /// document is otherwise left alone.
    pub fn register(&self, mut instance: Instance) -> Result<Instance, CoreError> {
        if instance.id.is_empty() {
            instance.id = generate_id();
        }
        validate_id(&instance.id)?;

        let _guard = self.write();
        self.ensure_dir()?;
        artifact::write_json(
            &self.path(Artifact::Record, &instance.id),
            &StaticRecord::from(&instance),
        )?;
        if !instance.entity_state.is_empty() {
            artifact::write_json(&self.path(Artifact::State, &instance.id), &instance.entity_state)?;
        }

        debug!(instance = %instance.id, "instance persisted");
        Ok(instance)
    }

    /// Replace the live state document. The static record is untouched.
    pub fn update_state(&self, id: &str, state: &EntityState) -> Result<(), CoreError> {
        validate_id(id)?;
        let _guard = self.write();
        self.require_record(id)?;
        artifact::write_json(&self.path(Artifact::State, id), state)
    }

    /// Merge per-entity values into the state document and return the
    /// merged result. Keys in the patch replace keys in the stored entity.
    pub fn patch_entities(&self, id: &str, patch: &EntityState) -> Result<EntityState, CoreError> {
        validate_id(id)?;
        let _guard = self.write();
        self.require_record(id)?;

        let path = self.path(Artifact::State, id);
        let mut state: EntityState = artifact::read_json(&path)?.unwrap_or_default();
        for (entity, values) in patch {
            state
                .entry(entity.clone())
                .or_default()
                .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        artifact::write_json(&path, &state)?;
        Ok(state)
    }

    /// Remove every artifact for `id`.
    ///
    /// Missing files are fine. Each removal is checked afterwards; every
    /// artifact is attempted and the first failure is returned.
    pub fn delete(&self, id: &str) -> Result<(), CoreError> {
        validate_id(id)?;
        let _guard = self.write();

        let mut first_err = None;
        for artifact in Artifact::ALL {
            let path = self.path(artifact, id);
            if let Err(e) = remove_verified(&path) {
                warn!(instance = id, path = %path.display(), error = %e, "artifact removal failed");
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => {
                info!(instance = id, "instance deleted");
                Ok(())
            }
        }
    }

    /// Every readable instance with its live state merged in, sorted by id.
    ///
    /// Unreadable or corrupt records are logged and left out.
    pub fn list(&self) -> Result<Vec<Instance>, CoreError> {
        let _guard = self.read();

        let entries = match std::fs::read_dir(&self.instances_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::persistence(&self.instances_dir, e)),
        };

        let mut instances = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_suffix(Artifact::Record.suffix()))
            else {
                continue;
            };
            if let Err(e) = validate_id(id) {
                warn!(error = %e, "skipping record with an unusable id");
                continue;
            }
            match self.load(id) {
                Ok(Some(instance)) => instances.push(instance),
                Ok(None) => {}
                Err(e) => warn!(instance = id, error = %e, "skipping unreadable instance"),
            }
        }

        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    /// One instance with its live state, `None` if it has no record.
    pub fn get(&self, id: &str) -> Result<Option<Instance>, CoreError> {
        validate_id(id)?;
        let _guard = self.read();
        self.load(id)
    }

    /// Live state document; empty when none was ever written.
    pub fn load_state(&self, id: &str) -> Result<EntityState, CoreError> {
        validate_id(id)?;
        let _guard = self.read();
        Ok(artifact::read_json(&self.path(Artifact::State, id))?.unwrap_or_default())
    }

    // ── Auxiliary artifacts ──────────────────────────────────────────

    /// Raw text of an artifact, `None` if absent.
    pub fn read_artifact(&self, id: &str, artifact: Artifact) -> Result<Option<String>, CoreError> {
        validate_id(id)?;
        let _guard = self.read();
        let path = self.path(artifact, id);
        artifact::read_optional(&path)?
            .map(|data| {
                String::from_utf8(data).map_err(|e| {
                    CoreError::persistence(
                        &path,
                        std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                    )
                })
            })
            .transpose()
    }

    pub fn write_script(&self, id: &str, content: &str) -> Result<(), CoreError> {
        validate_id(id)?;
        let _guard = self.write();
        self.ensure_dir()?;
        artifact::write_atomic(&self.path(Artifact::Script, id), content.as_bytes())
    }

    // ── Module config ────────────────────────────────────────────────

    /// Saved module config; empty when none was saved yet.
    pub fn load_module_config(&self) -> Result<ConfigMap, CoreError> {
        let _guard = self.read();
        Ok(artifact::read_json(&self.root.join(MODULE_CONFIG_FILE))?.unwrap_or_default())
    }

    pub fn save_module_config(&self, config: &ConfigMap) -> Result<(), CoreError> {
        let _guard = self.write();
        artifact::write_json(&self.root.join(MODULE_CONFIG_FILE), config)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn path(&self, artifact: Artifact, id: &str) -> PathBuf {
        artifact.path(&self.instances_dir, id)
    }

    fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_dir(&self) -> Result<(), CoreError> {
        std::fs::create_dir_all(&self.instances_dir)
            .map_err(|e| CoreError::persistence(&self.instances_dir, e))
    }

    fn require_record(&self, id: &str) -> Result<(), CoreError> {
        let path = self.path(Artifact::Record, id);
        match path.try_exists() {
            Ok(true) => Ok(()),
            Ok(false) => Err(CoreError::InstanceNotFound { id: id.to_owned() }),
            Err(e) => Err(CoreError::persistence(path, e)),
        }
    }

    /// Caller holds a lock.
    fn load(&self, id: &str) -> Result<Option<Instance>, CoreError> {
        let Some(mut instance) =
            artifact::read_json::<Instance>(&self.path(Artifact::Record, id))?
        else {
            return Ok(None);
        };
        if instance.id.is_empty() {
            id.clone_into(&mut instance.id);
        }

        instance.entity_state = match artifact::read_json(&self.path(Artifact::State, id)) {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!(instance = id, error = %e, "ignoring unreadable state document");
                EntityState::new()
            }
        };
        Ok(Some(instance))
    }
}

/// Remove one file and confirm it is gone. Absent files count as removed.
fn remove_verified(path: &Path) -> Result<(), CoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(CoreError::persistence(path, e)),
    }
    match path.try_exists() {
        Ok(false) => {
            debug!(path = %path.display(), "artifact removed");
            Ok(())
        }
        Ok(true) => Err(CoreError::DeleteVerification {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(CoreError::persistence(path, e)),
    }
}
