use thiserror::Error;

use crate::catalog::CatalogError;
use crate::pagination::PageError;
use crate::store::error::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("paginated fetch failed: {0}")]
    Pagination(#[from] PageError),

    /// The playlist was partially rewritten; `restored` tells whether the
    /// previous contents were put back.
    #[error("failed to update playlist '{playlist}' (restored: {restored}): {source}")]
    ApplyFailed {
        playlist: String,
        restored: bool,
        #[source]
        source: CatalogError,
    },

    #[error("failed to build search thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl SyncError {
    /// Authorization failures end the whole run; everything else only the
    /// current playlist.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Catalog(e) => e.is_fatal(),
            SyncError::Pagination(e) => e.is_fatal(),
            SyncError::ApplyFailed { source, .. } => source.is_fatal(),
            SyncError::Store(_) | SyncError::ThreadPool(_) => false,
        }
    }
}
