use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::time::{Duration, sleep};
use tracing::info;

use agente_core::app::{SessionFollower, StatusCounts, StoreBuilder};
use agente_core::config::SyncConfig;
use agente_core::crypto::{decrypt_api_key, encrypt_api_key};
use agente_core::domain::{Session, TaskDraft, TaskStatus, UserId};
use agente_core::impls::{InMemoryApiKeys, InMemoryTaskRepository, StaticAuthGateway};
use agente_core::ports::AuthGateway;

const PASSPHRASE_ENV: &str = "AGENTE_PASSPHRASE";

/// 自動化バックエンドの代役：期限が来たタスクを running → completed にする。
/// 持ち主の API キーを復号できなければ failed
async fn automation_loop(
    repo: InMemoryTaskRepository,
    keys: Arc<InMemoryApiKeys>,
    passphrase: String,
) {
    loop {
        for task in repo.due_tasks(Utc::now()) {
            info!(task_id = %task.id, "agent picked up task");
            if repo
                .write_status(&task.id, TaskStatus::Running, None, None)
                .is_err()
            {
                continue;
            }
            let api_key = keys
                .sealed(&task.user_id)
                .ok_or_else(|| "no API key stored".to_string())
                .and_then(|sealed| {
                    decrypt_api_key(&sealed, &passphrase).map_err(|e| e.to_string())
                });
            sleep(Duration::from_millis(500)).await;
            // the row may have been deleted meanwhile
            let _ = match api_key {
                Ok(_) => {
                    let result = format!("done: {}", task.task);
                    repo.write_status(&task.id, TaskStatus::Completed, Some(result), None)
                }
                Err(e) => repo.write_status(&task.id, TaskStatus::Failed, None, Some(e)),
            };
        }
        sleep(Duration::from_millis(200)).await;
    }
}

fn load_config() -> anyhow::Result<SyncConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            SyncConfig::load(&path).with_context(|| format!("loading config from {path}"))
        }
        None => Ok(SyncConfig::default()),
    }
}

fn render(counts: &StatusCounts) {
    println!(
        "scheduled={} running={} completed={} failed={}",
        counts.scheduled, counts.running, counts.completed, counts.failed
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout はスナップショット表示用。ログは stderr へ
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    info!(mode = ?config.mode, "agente starting");

    // (A) バックエンドとストアを用意
    let repo = InMemoryTaskRepository::new();
    let keys = Arc::new(InMemoryApiKeys::new());
    let auth = Arc::new(StaticAuthGateway::new());
    let store = StoreBuilder::new()
        .repository(Arc::new(repo.clone()))
        .api_keys(keys.clone())
        .config(config)
        .build()?;
    let follower = SessionFollower::spawn(auth.clone(), store.clone());
    let passphrase =
        std::env::var(PASSPHRASE_ENV).unwrap_or_else(|_| "demo-passphrase".to_string());
    let automation = tokio::spawn(automation_loop(
        repo.clone(),
        keys.clone(),
        passphrase.clone(),
    ));

    // (B) サインインして API キーを暗号化して登録
    let session = Session::new(UserId::new("demo"), "demo-token");
    keys.store(&session.user_id, encrypt_api_key("sk-demo", &passphrase)?);
    let mut snapshots = store.watch();
    auth.sign_in(session);
    snapshots.changed().await?;

    // (C) 少し先の時刻でタスクをスケジュール
    for (text, secs) in [("check the weather", 1), ("summarize the news", 2)] {
        let draft = TaskDraft::new(text, Utc::now() + ChronoDuration::seconds(secs));
        let task = store.schedule(draft).await?;
        println!("scheduled {} at {}", task.id, task.scheduled_time);
    }

    // (D) スナップショットの変化を表示し、全部終わったら抜ける
    loop {
        let tasks = snapshots.borrow_and_update().clone();
        let counts = StatusCounts::tally(&tasks);
        render(&counts);
        if counts.total() > 0 && counts.all_terminal() {
            for task in &tasks {
                println!(
                    "{} [{}] {}",
                    task.id,
                    task.status,
                    task.result.as_deref().unwrap_or("-")
                );
            }
            break;
        }
        snapshots.changed().await?;
    }

    // (E) サインアウトで teardown、後片付け
    auth.sign_out().await?;
    follower.shutdown_and_join().await;
    store.teardown().await?;
    automation.abort();
    Ok(())
}
