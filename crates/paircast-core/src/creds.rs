use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    domain::SessionId,
    Result,
};

/// File whose presence marks a directory as holding real authentication
/// material (as opposed to a directory created for a pairing attempt that
/// never completed).
const MATERIAL_FILE: &str = "creds.json";

/// Per-session durable key/value store for transport authentication state.
///
/// The core treats the contents as opaque: providers read and write their own
/// multi-file state here. The directory is deleted only through
/// [`CredentialStore::delete_all`], which is reachable only from the explicit
/// logout operation.
#[derive(Debug)]
pub struct CredentialStore {
    id: SessionId,
    dir: PathBuf,
}

impl CredentialStore {
    /// Resolve-or-create the credential directory for a session.
    pub fn open(sessions_dir: &Path, id: &SessionId) -> Result<Self> {
        let dir = sessions_dir.join(id.as_str());
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            tracing::info!(session = %id, dir = %dir.display(), "created credential directory");
        }
        Ok(Self {
            id: id.clone(),
            dir,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// True once the transport has stored authentication material here.
    pub fn has_material(&self) -> bool {
        self.dir.join(MATERIAL_FILE).exists()
    }

    /// Check material presence without creating the directory.
    pub fn linked(sessions_dir: &Path, id: &SessionId) -> bool {
        sessions_dir.join(id.as_str()).join(MATERIAL_FILE).exists()
    }

    pub fn exists(sessions_dir: &Path, id: &SessionId) -> bool {
        sessions_dir.join(id.as_str()).exists()
    }

    pub fn save(&self, name: &str, bytes: &[u8]) -> Result<()> {
        fs::write(self.dir.join(name), bytes)?;
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }

    /// Zero-length marker files for once-per-credential-lifetime actions.
    pub fn has_flag(&self, name: &str) -> bool {
        self.dir.join(name).exists()
    }

    pub fn set_flag(&self, name: &str) -> Result<()> {
        fs::write(self.dir.join(name), b"")?;
        Ok(())
    }

    /// Remove the whole directory. Explicit logout only.
    pub fn delete_all(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
            tracing::info!(session = %self.id, "credential directory deleted (explicit logout)");
        }
        Ok(())
    }

    /// Sessions with stored material, for startup reload.
    pub fn list_linked(sessions_dir: &Path) -> Result<Vec<SessionId>> {
        let mut out = Vec::new();
        if !sessions_dir.exists() {
            return Ok(out);
        }
        for entry in fs::read_dir(sessions_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let id = SessionId::normalize(&name);
            if id.as_str() != name {
                tracing::warn!(dir = %name, "skipping non-numeric session directory");
                continue;
            }
            if Self::linked(sessions_dir, &id) {
                out.push(id);
            }
        }
        out.sort();
        Ok(out)
    }
}
