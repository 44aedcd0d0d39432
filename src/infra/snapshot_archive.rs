use crate::error::{PipelineError, Result};
use crate::snapshot::{RunId, Snapshot};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One JSON file per snapshot under a directory.
///
/// Each file starts with the sha256 of the JSON body on its own line. Files
/// are written to a temporary name and renamed into place, so a reader sees
/// either the whole snapshot or no file at all.
#[derive(Debug, Clone)]
pub struct SnapshotArchive {
    root: PathBuf,
}

fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

impl SnapshotArchive {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, run_id: &RunId) -> PathBuf {
        self.root.join(format!("{}.json", run_id))
    }

    pub fn write(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        let body = serde_json::to_vec(snapshot)?;
        let mut bytes = checksum(&body).into_bytes();
        bytes.push(b'\n');
        bytes.extend_from_slice(&body);

        let path = self.path_for(&snapshot.run_id);
        let tmp = self.root.join(format!(".{}.json.tmp", snapshot.run_id));
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;
        debug!("archived snapshot {} ({} bytes)", snapshot.run_id, bytes.len());
        Ok(path)
    }

    pub fn read(&self, run_id: &RunId) -> Result<Snapshot> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Err(PipelineError::SnapshotNotFound(run_id.to_string()));
        }
        Self::read_path(&path)
    }

    fn read_path(path: &Path) -> Result<Snapshot> {
        let bytes = fs::read(path)?;
        let split = bytes
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| PipelineError::Store {
                message: format!("{}: missing checksum line", path.display()),
            })?;
        let (header, body) = (&bytes[..split], &bytes[split + 1..]);
        if header != checksum(body).as_bytes() {
            return Err(PipelineError::Store {
                message: format!("{}: checksum mismatch", path.display()),
            });
        }
        Ok(serde_json::from_slice(body)?)
    }

    pub fn remove(&self, run_id: &RunId) -> Result<()> {
        match fs::remove_file(self.path_for(run_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every readable snapshot in the directory. Corrupt or foreign files
    /// are skipped with a warning.
    pub fn load_all(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let Some(stem) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            if RunId::parse(stem).is_none() {
                continue;
            }
            match Self::read_path(&path) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!("skipping archived snapshot {}: {}", path.display(), e),
            }
        }
        snapshots.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(snapshots)
    }
}
