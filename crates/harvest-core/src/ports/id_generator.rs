//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::CollectionId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は収集 ID を発行
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数セッションのタスクから使える）
pub trait IdGenerator: Send + Sync {
    fn generate_collection_id(&self) -> CollectionId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_collection_id(&self) -> CollectionId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        CollectionId::from(ulid)
    }
}
