//! heddle-core
//!
//! Cooperative task scheduling on top of tokio.
//!
//! # モジュール構成
//! - **domain**: ids, task state machine
//! - **error**: `TaskError`（タスクに記録されるエラー）, `TaskFault`（API の誤用）
//! - **task**: Task 本体、body、ExecutionContext、observer、timeout
//! - **condition**: 実行前に評価される条件と evaluator
//! - **exclusivity**: カテゴリ単位の排他制御
//! - **queue**: TaskQueue（依存・一時停止・同時実行数を見て start する）
//! - **group**: 子タスクを内部キューで実行する GroupTask
//! - **status**: スナップショットと集計（診断用）

pub mod condition;
pub mod domain;
pub mod error;
pub mod exclusivity;
pub mod group;
pub mod queue;
pub mod status;
pub mod task;

pub use condition::{Condition, ConditionExt, ConditionResult};
pub use domain::{QueueId, TaskId, TaskState};
pub use error::{TaskError, TaskFault};
pub use exclusivity::{ExclusivityManager, ExclusivityPolicy};
pub use group::GroupTask;
pub use queue::{QueueConfig, QueueDelegate, TaskQueue};
pub use status::{QueueCounts, TaskSnapshot};
pub use task::{ExecutionContext, Task, TaskBody, TaskObserver};
