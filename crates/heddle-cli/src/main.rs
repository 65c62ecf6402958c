//! heddle demo.
//!
//! 1. 排他カテゴリ "alert" を持つ A, B, C を投入し、投入順に実行されることを示す
//! 2. タイムアウト付きのグループを実行し、子のエラー集約を示す
//! 3. 各タスクのスナップショットを JSON で出力する
//!
//! 引数にキュー設定（JSON ファイル）を渡すとそれを使う。

use std::sync::Arc;
use std::time::Duration;

use heddle_core::condition::MutuallyExclusive;
use heddle_core::task::TimeoutObserver;
use heddle_core::{GroupTask, QueueConfig, Task, TaskError, TaskQueue};
use parking_lot::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn alert(name: &'static str, delay_ms: u64, out: Arc<Mutex<Vec<&'static str>>>) -> Task {
    Task::from_fn(format!("alert {}", name), move |ctx| async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        out.lock().push(name);
        if let Err(fault) = ctx.finish(Vec::new()) {
            error!("{}", fault);
        }
    })
}

fn load_config() -> Result<QueueConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)?;
            Ok(QueueConfig::from_json(&json)?)
        }
        None => Ok(QueueConfig::named("demo")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    info!("queue config: {}", serde_json::to_string(&config)?);
    let queue = TaskQueue::new(config);

    // (A) 排他: 後から来たものほど短いが、出力は投入順
    let out = Arc::new(Mutex::new(Vec::new()));
    let mut alerts = Vec::new();
    for (name, delay) in [("A", 60), ("B", 30), ("C", 10)] {
        let task = alert(name, delay, out.clone());
        task.add_condition(MutuallyExclusive::new("alert"))?;
        alerts.push(task.clone());
        queue.add_task(task)?;
    }

    // (B) グループ: 1 つは失敗、1 つはタイムアウト
    let slow = Task::from_fn("slow download", |ctx| async move {
        tokio::select! {
            _ = ctx.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_secs(30)) => {}
        }
    });
    slow.add_observer(TimeoutObserver::new(Duration::from_millis(100)))?;
    let broken = Task::from_fn("broken parser", |ctx| async move {
        if let Err(fault) = ctx.fail(TaskError::failed("unexpected token")) {
            error!("{}", fault);
        }
    });
    let group = GroupTask::new("import", vec![slow, broken, Task::noop("index")]);
    queue.add_task(group.task().clone())?;

    queue.wait_until_idle().await;

    println!("{}.", out.lock().join(" "));

    for e in group.aggregated_errors() {
        println!("group error: {}", e);
    }
    let mut snapshots: Vec<_> = alerts.iter().map(Task::snapshot).collect();
    snapshots.push(group.task().snapshot());
    snapshots.extend(group.children().iter().map(Task::snapshot));
    println!("{}", serde_json::to_string_pretty(&snapshots)?);
    Ok(())
}
