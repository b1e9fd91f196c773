//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryObjectStore**: 開発・テスト用の ObjectStore
//! - **LocalObjectStore**: ファイルシステム上の ObjectStore
//! - **CollectorRegistry**: カテゴリ → Collector の振り分け

pub mod collector_registry;
pub mod inmem_store;
pub mod local_store;

pub use self::collector_registry::{CollectorRegistry, RegistryError};
pub use self::inmem_store::InMemoryObjectStore;
pub use self::local_store::LocalObjectStore;
