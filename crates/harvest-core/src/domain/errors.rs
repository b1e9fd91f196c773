//! Errors - エラー型と分類
//!
//! # 分類（ErrorKind）
//! - Conflict: 同一セッションで収集が実行中（呼び出し元へ返す、コアはリトライしない）
//! - PerCategory: 1 カテゴリの収集失敗（ループは止めない、プレースホルダーで埋める）
//! - FatalRun: 収集そのものが開始できない（カテゴリ未選択、認証失敗など）
//! - Persistence: ObjectStore への書き込み・読み込み失敗
//! - NotFound: 収集レコードが存在しない（通常の否定結果）

use thiserror::Error;

use super::ids::{CollectionId, OwnerId, SessionId};
use crate::ports::StoreError;

/// ErrorKind は運用上のエラー分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    PerCategory,
    FatalRun,
    Persistence,
    NotFound,
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("collection already in progress for session={session}")]
    AlreadyRunning { session: SessionId },

    #[error("collection could not run: {0}")]
    FatalRun(String),

    #[error("collector failed for category={category}: {message}")]
    Category { category: String, message: String },

    #[error("collection not found: owner={owner} collection={collection}")]
    NotFound {
        owner: OwnerId,
        collection: CollectionId,
    },

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HarvestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarvestError::AlreadyRunning { .. } => ErrorKind::Conflict,
            HarvestError::FatalRun(_) => ErrorKind::FatalRun,
            HarvestError::Category { .. } => ErrorKind::PerCategory,
            HarvestError::NotFound { .. } => ErrorKind::NotFound,
            HarvestError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            HarvestError::InvalidId(_) => ErrorKind::NotFound,
            HarvestError::Store(_) | HarvestError::Serialization(_) => ErrorKind::Persistence,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
