use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const TOKEN_FILE: &str = "copilot_token";

/// File-backed storage for the GitHub OAuth token used by Copilot.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            path: config_dir.join(TOKEN_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored token, or `None` when the user has not logged in.
    pub fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let token = raw.trim().to_string();
                Ok((!token.is_empty()).then_some(token))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }

    pub fn save(&self, token: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        std::fs::write(&self.path, token)
            .with_context(|| format!("writing {}", self.path.display()))?;
        restrict_permissions(&self.path)?;
        tracing::info!(path = %self.path.display(), "saved copilot token");
        Ok(())
    }

    /// Delete the stored token. Removing a missing token is not an error.
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("setting permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> TokenStore {
        let dir = std::env::temp_dir().join(format!("ask_cli_test_{}", uuid::Uuid::new_v4()));
        TokenStore::new(&dir)
    }

    #[test]
    fn test_load_missing_is_none() {
        let store = temp_store();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_save_load_remove() {
        let store = temp_store();
        store.save("gho_abc123\n").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("gho_abc123"));

        store.remove().unwrap();
        assert_eq!(store.load().unwrap(), None);
        // Second remove is a no-op.
        store.remove().unwrap();

        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_token_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let store = temp_store();
        store.save("secret").unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }
}
