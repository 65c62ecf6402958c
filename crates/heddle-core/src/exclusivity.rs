//! Mutual exclusion across tasks by category name.
//!
//! # 排他制御
//! カテゴリごとに「保持中のタスク」の列を持ちます。
//!
//! - `Enqueue`: 新しいタスクは列にいるすべてのタスクへの依存を得て、順番に実行される
//!   （途中のタスクがキャンセルされて先に終わっても、前のタスクを追い越さない）
//! - `Cancel`: 列が空でなければ新しいタスクは `Superseded` でキャンセルされる
//!
//! 解放はタスクの終了時（キューの finish hook）に行います。
//! マネージャはキューから注入されます。`global()` は複数のキューで
//! カテゴリを共有したいとき用の共有インスタンスです。

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::TaskError;
use crate::task::{DependencyOrigin, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusivityPolicy {
    /// Run after the current holders.
    #[default]
    Enqueue,
    /// Give up if the category is held.
    Cancel,
}

/// Result of a claim.
#[derive(Debug, Clone)]
pub enum Claim {
    /// The task now holds a place in the category; `previous` is the holder
    /// it was ordered behind, if any.
    Acquired { previous: Option<Task> },
    /// The category was held by `holder`; the task has been cancelled.
    Superseded { holder: Task },
}

static GLOBAL: LazyLock<Arc<ExclusivityManager>> =
    LazyLock::new(|| Arc::new(ExclusivityManager::new("global")));

pub struct ExclusivityManager {
    name: String,
    categories: Mutex<HashMap<String, Vec<Task>>>,
}

impl ExclusivityManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            categories: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide manager.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current holders of `category`, oldest first.
    pub fn holders(&self, category: &str) -> Vec<Task> {
        self.categories
            .lock()
            .get(category)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_held(&self, category: &str) -> bool {
        self.categories.lock().contains_key(category)
    }

    /// Place `task` into `category` according to `policy`.
    ///
    /// Dependencies and cancellation are applied after the registry lock is
    /// released.
    pub fn claim(&self, task: &Task, category: &str, policy: ExclusivityPolicy) -> Claim {
        let mut ahead: Vec<Task> = Vec::new();
        let claim = {
            let mut categories = self.categories.lock();
            let holders = categories.entry(category.to_string()).or_default();
            match policy {
                ExclusivityPolicy::Enqueue => {
                    ahead = holders
                        .iter()
                        .take_while(|holder| *holder != task)
                        .cloned()
                        .collect();
                    if !holders.contains(task) {
                        holders.push(task.clone());
                    }
                    Claim::Acquired {
                        previous: ahead.last().cloned(),
                    }
                }
                ExclusivityPolicy::Cancel => match holders.first() {
                    Some(holder) if holder != task => Claim::Superseded {
                        holder: holder.clone(),
                    },
                    Some(_) => Claim::Acquired { previous: None },
                    None => {
                        holders.push(task.clone());
                        Claim::Acquired { previous: None }
                    }
                },
            }
        };

        match &claim {
            Claim::Acquired {
                previous: Some(previous),
            } => {
                debug!("[{}] {} queued behind {} in '{}'", self.name, task, previous, category);
                // Every holder ahead, not just the last: a cancelled holder
                // finishes early and must not let the newcomer overtake.
                for holder in &ahead {
                    if let Err(fault) = task.add_dependency_with(holder, DependencyOrigin::Exclusivity)
                    {
                        warn!("[{}] exclusivity ordering skipped: {}", self.name, fault);
                    }
                }
            }
            Claim::Acquired { previous: None } => {
                debug!("[{}] {} holds '{}'", self.name, task, category);
            }
            Claim::Superseded { holder } => {
                info!("[{}] {} superseded: '{}' held by {}", self.name, task, category, holder);
                task.cancel_with(TaskError::Superseded {
                    category: category.to_string(),
                });
            }
        }
        claim
    }

    /// Remove `task` from `category`. Returns whether it was a holder.
    pub fn release(&self, task: &Task, category: &str) -> bool {
        let mut categories = self.categories.lock();
        let Some(holders) = categories.get_mut(category) else {
            return false;
        };
        let before = holders.len();
        holders.retain(|holder| holder != task);
        let released = holders.len() != before;
        if holders.is_empty() {
            categories.remove(category);
        }
        if released {
            debug!("[{}] {} released '{}'", self.name, task, category);
        }
        released
    }
}

impl std::fmt::Debug for ExclusivityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusivityManager")
            .field("name", &self.name)
            .field("categories", &self.categories.lock().len())
            .finish()
    }
}
