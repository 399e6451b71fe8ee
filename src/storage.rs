use std::path::{Path, PathBuf};

/// Write `data` to `path` through a sibling temp file and a rename, so readers
/// never observe a half-written file.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(
        ".{file_name}.{:016x}.tmp",
        rand::random::<u64>()
    ));

    if let Err(err) = std::fs::write(&temp_path, data) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(err);
    }

    std::fs::rename(&temp_path, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&temp_path);
    })
}

/// Files living directly under the application base directory
/// (config.yaml and friends).
#[derive(Clone, Debug)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = storage_dir.into();
        std::fs::create_dir_all(&path)?;
        Ok(BackendLocal { base_dir: path })
    }

    fn path(&self, ident: &str) -> PathBuf {
        self.base_dir.join(ident)
    }

    pub fn exists(&self, ident: &str) -> bool {
        std::fs::metadata(self.path(ident)).is_ok()
    }

    pub fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path(ident))
    }

    pub fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        write_atomic(&self.path(ident), data)
    }
}
