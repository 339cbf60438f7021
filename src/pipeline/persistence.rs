// Local project storage. Loaded on startup, written on every change.
//
// Layout: a small key-value store. `projects` holds the JSON array of every
// project, `active_project` holds the id of the one being edited. There is a
// single writer and no locking; two processes sharing a data dir will
// overwrite each other.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::pipeline::project::Project;

pub const PROJECTS_KEY: &str = "projects";
pub const ACTIVE_KEY: &str = "active_project";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode projects: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no project with id '{0}'")]
    NotFound(String),
}

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// One file per key: `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // write to a temp file beside the target, then rename over it
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.flush()?;
        tmp.persist(self.path(key)).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    map: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.map.insert(key.to_string(), value.to_string());
        self
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.map.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.map.remove(key);
        Ok(())
    }
}

/// The project list plus the active pointer. Always holds at least one
/// project, and the active id always names one of them.
pub struct ProjectStore<S: KeyValueStore> {
    backend: S,
    projects: Vec<Project>,
    active_id: String,
}

impl ProjectStore<FileStore> {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::load(FileStore::open(dir)?)
    }
}

impl<S: KeyValueStore> ProjectStore<S> {
    /// Read the stored list, repairing whatever is missing or stale: an
    /// empty or unreadable list becomes one default project, an active id
    /// that points nowhere moves to the most recently updated project.
    pub fn load(backend: S) -> Result<Self, StoreError> {
        let projects = match backend.get(PROJECTS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Project>>(&raw) {
                Ok(list) => list,
                Err(e) => {
                    warn!(error = %e, "stored project list is unreadable, starting fresh");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "could not read stored projects, starting fresh");
                Vec::new()
            }
        };
        let stored_active = backend.get(ACTIVE_KEY).ok().flatten();

        let mut store = Self {
            backend,
            projects,
            active_id: String::new(),
        };
        let mut repaired = false;

        if store.projects.is_empty() {
            store.projects.push(Project::new(Project::DEFAULT_NAME));
            info!("no stored projects, created a default one");
            repaired = true;
        }

        match stored_active.map(|s| s.trim().to_string()) {
            Some(id) if store.get(&id).is_some() => store.active_id = id,
            other => {
                if let Some(stale) = other {
                    warn!(id = %stale, "active project id is stale, picking the latest project");
                }
                store.active_id = most_recent_id(&store.projects);
                repaired = true;
            }
        }

        if repaired {
            let (projects, active_id) = (store.projects.clone(), store.active_id.clone());
            store.commit(projects, active_id)?;
        }
        debug!(count = store.projects.len(), active = %store.active_id, "projects loaded");
        Ok(store)
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn active_id(&self) -> &str {
        &self.active_id
    }

    pub fn active(&self) -> &Project {
        // load() and every mutation keep active_id pointing at a stored project
        self.projects
            .iter()
            .find(|p| p.id == self.active_id)
            .unwrap_or(&self.projects[0])
    }

    pub fn get(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn create(&mut self, name: &str, activate: bool) -> Result<Project, StoreError> {
        let project = Project::new(name);
        let mut projects = self.projects.clone();
        projects.push(project.clone());
        let active_id = if activate { project.id.clone() } else { self.active_id.clone() };
        self.commit(projects, active_id)?;
        info!(id = %project.id, name, "project created");
        Ok(project)
    }

    /// Replace the stored project with the same id. The value is taken as
    /// is (no field merging) and gets a fresh `updated_at`.
    pub fn update(&mut self, mut project: Project) -> Result<Project, StoreError> {
        let idx = self
            .position(&project.id)
            .ok_or_else(|| StoreError::NotFound(project.id.clone()))?;
        project.touch();
        let mut projects = self.projects.clone();
        projects[idx] = project.clone();
        self.commit(projects, self.active_id.clone())?;
        Ok(project)
    }

    pub fn set_active(&mut self, id: &str) -> Result<(), StoreError> {
        if self.get(id).is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.commit(self.projects.clone(), id.to_string())
    }

    /// Remove a project. Deleting the active one moves the pointer to the
    /// most recently updated survivor, or to a new default project when
    /// nothing is left.
    pub fn delete(&mut self, id: &str) -> Result<(), StoreError> {
        let idx = self
            .position(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut projects = self.projects.clone();
        let removed = projects.remove(idx);

        if projects.is_empty() {
            projects.push(Project::new(Project::DEFAULT_NAME));
            info!("last project deleted, created a default one");
        }
        let active_id = if removed.id == self.active_id {
            most_recent_id(&projects)
        } else {
            self.active_id.clone()
        };
        self.commit(projects, active_id)?;
        info!(id = %removed.id, name = %removed.name, "project deleted");
        Ok(())
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.projects.iter().position(|p| p.id == id)
    }

    // Memory only takes the new state once the backend has it.
    fn commit(&mut self, projects: Vec<Project>, active_id: String) -> Result<(), StoreError> {
        let json = serde_json::to_string(&projects)?;
        self.backend.set(PROJECTS_KEY, &json)?;
        self.backend.set(ACTIVE_KEY, &active_id)?;
        self.projects = projects;
        self.active_id = active_id;
        Ok(())
    }
}

fn most_recent_id(projects: &[Project]) -> String {
    projects
        .iter()
        .max_by_key(|p| p.updated_at)
        .map(|p| p.id.clone())
        .unwrap_or_default()
}
