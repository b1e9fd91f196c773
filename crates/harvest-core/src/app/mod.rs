//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **CollectionService**: Job API（start / poll / get / list / delete）
//! - **CollectionJobTracker**: セッション単位のジョブ状態
//! - **CollectionOrchestrator**: バックグラウンドでの収集実行と永続化
//! - **CollectionRepository**: ObjectStore + ResultCache の読み書き

pub mod builder;
pub mod orchestrator;
pub mod repository;
pub mod service;
pub mod tracker;

// 主要な型を再エクスポート
pub use self::builder::{AppBuilder, BuildError};
pub use self::orchestrator::{CollectionOrchestrator, RunReport, RunRequest};
pub use self::repository::CollectionRepository;
pub use self::service::{CollectionService, StartRequest};
pub use self::tracker::CollectionJobTracker;
