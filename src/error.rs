use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum SyncError {
    /// The index table failed validation after appending new batches.
    /// Carries the rendered table so the operator can see the damage.
    IndexInconsistency { content: String, detail: String },
    /// A store file has a bad magic or an unsupported version.
    BadStoreHeader { path: PathBuf, detail: &'static str },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::IndexInconsistency { content, detail } => {
                write!(f, "index table inconsistency for {content}: {detail}")
            }
            SyncError::BadStoreHeader { path, detail } => {
                write!(f, "bad store header in {}: {detail}", path.display())
            }
        }
    }
}

impl std::error::Error for SyncError {}
