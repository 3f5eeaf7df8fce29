//! Persisted target charge weight.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::{fs, io::Write};

use trickler_traits::TargetStore;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedTarget {
    target_grains: f32,
}

/// Target weight kept in a one-key TOML file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileTargetStore {
    path: PathBuf,
}

impl FileTargetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

impl TargetStore for FileTargetStore {
    fn load(&mut self) -> Result<Option<f32>, Box<dyn std::error::Error + Send + Sync>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Box::new(e)),
        };
        let p: PersistedTarget = toml::from_str(&text)?;
        Ok(Some(p.target_grains))
    }

    fn save(&mut self, grains: f32) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let text = toml::to_string(&PersistedTarget {
            target_grains: grains,
        })?;
        write_atomic(&self.path, text.as_bytes())?;
        Ok(())
    }
}

/// Volatile store for the simulator and tests. Clones share the slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryTargetStore {
    value: Rc<Cell<Option<f32>>>,
    writes: Rc<Cell<u32>>,
}

impl MemoryTargetStore {
    pub fn with_value(grains: f32) -> Self {
        let s = Self::default();
        s.value.set(Some(grains));
        s
    }

    pub fn value(&self) -> Option<f32> {
        self.value.get()
    }

    /// Number of `save` calls so far.
    pub fn writes(&self) -> u32 {
        self.writes.get()
    }
}

impl TargetStore for MemoryTargetStore {
    fn load(&mut self) -> Result<Option<f32>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.value.get())
    }

    fn save(&mut self, grains: f32) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.value.set(Some(grains));
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}
