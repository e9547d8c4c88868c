use std::io;
use std::path::{Component, Path, PathBuf};

use venue_core::ProtocolError;
use venue_store::{MessageRepo, StoreError, TextMessage};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Rejected(#[from] ProtocolError),
    #[error("upload name must not be empty")]
    EmptyName,
    #[error("upload name {0:?} must be a plain file name")]
    InvalidName(String),
    #[error("upload is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("ingest worker failed: {0}")]
    Worker(String),
}

/// Accepts audience submissions: audio files into the upload directory,
/// text messages into the store.
#[derive(Clone)]
pub struct UploadIngestor {
    upload_dir: PathBuf,
    max_bytes: usize,
    messages: MessageRepo,
}

impl UploadIngestor {
    pub fn new(upload_dir: impl Into<PathBuf>, max_bytes: usize, messages: MessageRepo) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            max_bytes,
            messages,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Create the upload directory if it is missing.
    pub async fn prepare(&self) -> Result<(), IngestError> {
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|source| IngestError::Write {
                path: self.upload_dir.clone(),
                source,
            })
    }

    /// Accept only a single normal path component, so a client can never
    /// write outside the upload directory.
    pub fn validate_name(name: &str) -> Result<(), IngestError> {
        if name.trim().is_empty() {
            return Err(IngestError::EmptyName);
        }
        if name.contains(['/', '\\', '\0']) {
            return Err(IngestError::InvalidName(name.to_owned()));
        }
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(()),
            _ => Err(IngestError::InvalidName(name.to_owned())),
        }
    }

    /// Write an audio upload to `<upload_dir>/<name>`. An existing file of the
    /// same name is replaced.
    pub async fn ingest_audio(&self, name: &str, data: &[u8]) -> Result<PathBuf, IngestError> {
        Self::validate_name(name)?;
        if data.len() > self.max_bytes {
            return Err(IngestError::TooLarge {
                size: data.len(),
                limit: self.max_bytes,
            });
        }

        let path = self.upload_dir.join(name);
        tokio::fs::write(&path, data)
            .await
            .map_err(|source| IngestError::Write {
                path: path.clone(),
                source,
            })?;

        tracing::info!(path = %path.display(), bytes = data.len(), "audio upload stored");
        Ok(path)
    }

    /// Persist a text message. Resolves once the row is committed.
    pub async fn ingest_text(&self, message: String) -> Result<TextMessage, IngestError> {
        let repo = self.messages.clone();
        let stored = tokio::task::spawn_blocking(move || repo.insert(&message))
            .await
            .map_err(|e| IngestError::Worker(e.to_string()))??;

        tracing::info!(message_id = stored.id, "text message stored");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use venue_store::Database;

    fn ingestor(dir: &Path) -> UploadIngestor {
        UploadIngestor::new(dir, 1024, MessageRepo::new(Database::in_memory().unwrap()))
    }

    #[tokio::test]
    async fn audio_written_to_upload_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());

        let path = ingestor.ingest_audio("take1.wav", b"RIFF").await.unwrap();
        assert_eq!(path, dir.path().join("take1.wav"));
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFF");
    }

    #[tokio::test]
    async fn same_name_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());

        ingestor.ingest_audio("a.wav", b"first").await.unwrap();
        let path = ingestor.ingest_audio("a.wav", b"second").await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn unwritable_dir_reports_write_error() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the directory should be fails regardless of privileges.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();
        let ingestor = ingestor(&blocker.join("uploads"));

        let err = ingestor.ingest_audio("a.wav", b"data").await.unwrap_err();
        assert!(matches!(err, IngestError::Write { .. }), "got: {err}");
        assert!(ingestor.prepare().await.is_err());
    }

    #[tokio::test]
    async fn prepare_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(&dir.path().join("nested").join("uploads"));
        ingestor.prepare().await.unwrap();
        assert!(ingestor.upload_dir().is_dir());
        ingestor.ingest_audio("ok.wav", b"x").await.unwrap();
    }

    #[test]
    fn rejects_names_that_escape() {
        for name in ["../etc/passwd", "a/b.wav", "a\\b.wav", "..", ".", "/abs.wav"] {
            assert!(
                matches!(UploadIngestor::validate_name(name), Err(IngestError::InvalidName(_))),
                "accepted {name:?}"
            );
        }
        assert!(matches!(UploadIngestor::validate_name(""), Err(IngestError::EmptyName)));
        assert!(matches!(UploadIngestor::validate_name("   "), Err(IngestError::EmptyName)));
        assert!(UploadIngestor::validate_name("take 1.wav").is_ok());
        assert!(UploadIngestor::validate_name(".hidden.wav").is_ok());
    }

    #[tokio::test]
    async fn oversized_upload_rejected_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(dir.path());

        let err = ingestor.ingest_audio("big.wav", &vec![0u8; 2048]).await.unwrap_err();
        assert!(matches!(err, IngestError::TooLarge { size: 2048, limit: 1024 }), "got: {err}");
        assert!(!dir.path().join("big.wav").exists());
    }

    #[tokio::test]
    async fn text_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let repo = MessageRepo::new(Database::in_memory().unwrap());
        let ingestor = UploadIngestor::new(dir.path(), 1024, repo.clone());

        let stored = ingestor.ingest_text("hello".into()).await.unwrap();
        assert_eq!(stored.message, "hello");

        let all = repo.load_all().unwrap();
        assert_eq!(all, vec![stored]);
    }

    #[tokio::test]
    async fn text_survives_store_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("venue.db");

        let stored = {
            let repo = MessageRepo::new(Database::open(&db_path).unwrap());
            UploadIngestor::new(dir.path(), 1024, repo)
                .ingest_text("remember me".into())
                .await
                .unwrap()
        };

        let reopened = MessageRepo::new(Database::open(&db_path).unwrap());
        let all = reopened.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].message, "remember me");
        assert_eq!(all[0].created_at, stored.created_at);
    }
}
