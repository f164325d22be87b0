use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OAuthError;
use crate::token::Token;

/// Persistence backend for a single client's token.
///
/// Implementations wrap whatever secure storage the platform offers; the
/// engine only needs these three operations.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<Token>, OAuthError>;
    fn save(&self, token: &Token) -> Result<(), OAuthError>;
    fn delete(&self) -> Result<(), OAuthError>;
}

/// Configuration for file-backed credential storage.
#[derive(Debug, Clone)]
pub struct CredentialStoreConfig {
    pub base_dir: PathBuf,
}

impl CredentialStoreConfig {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn default_dir() -> PathBuf {
        default_data_dir()
    }
}

/// File-backed credential store writing one TOML file per client key.
///
/// # Example
/// ```no_run
/// use oauth2_engine::store::{CredentialStore, FileCredentialStore};
/// use oauth2_engine::Token;
///
/// let store = FileCredentialStore::new_default("github");
/// store.save(&Token::bearer("access"))?;
/// # Ok::<(), oauth2_engine::OAuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
    key: String,
}

impl FileCredentialStore {
    pub fn new(config: CredentialStoreConfig, key: impl Into<String>) -> Self {
        let key = key.into();
        let path = config
            .base_dir
            .join(format!("{}.toml", normalize_label(&key)));
        Self { path, key }
    }

    pub fn new_default(key: impl Into<String>) -> Self {
        Self::new(CredentialStoreConfig::new(default_data_dir()), key)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(path: &Path) -> Result<(), OAuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Token>, OAuthError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(OAuthError::Io(err.to_string())),
        };
        let file: CredentialFile = toml::from_str(&raw)?;
        if file.version != CREDENTIAL_FILE_VERSION {
            return Err(OAuthError::Serialization(format!(
                "unsupported credential file version {}",
                file.version
            )));
        }
        Ok(Some(file.token))
    }

    fn save(&self, token: &Token) -> Result<(), OAuthError> {
        Self::ensure_parent(&self.path)?;
        let file = CredentialFile {
            version: CREDENTIAL_FILE_VERSION,
            client: self.key.clone(),
            saved_at: Utc::now(),
            token: token.clone(),
        };
        let serialized = toml::to_string(&file)?;
        write_private(&self.path, serialized.as_bytes())?;
        Ok(())
    }

    fn delete(&self) -> Result<(), OAuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(OAuthError::Io(err.to_string())),
        }
    }
}

/// Write `contents` to a file only the owner can read. New files are
/// created as `0600`; an existing file is narrowed before it is written.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)?;
    file.sync_all()
}

/// Process-local credential store, mostly useful in tests and for clients
/// that must not touch the disk.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<Token>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: Token) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Token>> {
        self.token
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Token>, OAuthError> {
        Ok(self.slot().clone())
    }

    fn save(&self, token: &Token) -> Result<(), OAuthError> {
        *self.slot() = Some(token.clone());
        Ok(())
    }

    fn delete(&self) -> Result<(), OAuthError> {
        *self.slot() = None;
        Ok(())
    }
}

const CREDENTIAL_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialFile {
    version: u32,
    client: String,
    saved_at: DateTime<Utc>,
    token: Token,
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "oauth2-engine")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".oauth2-engine"))
}

fn normalize_label(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "default".to_string();
    }
    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() || lower == '-' {
            out.push(lower);
        } else {
            out.push('-');
        }
    }
    if out.trim_matches('-').is_empty() {
        "default".to_string()
    } else {
        out
    }
}
