//! End-to-end: a remote worker driving a live master over HTTP.
//!
//! Boots the master app on an ephemeral port, submits tasks through the
//! API, and lets a remote-mode one-shot worker claim, execute, and report.

use std::net::SocketAddr;

use serde_json::json;
use sqlx::SqlitePool;
use tempfile::TempDir;

use agentflow::config::{ClaudeConfig, Config};
use agentflow::db;
use agentflow::master::server::{router, AppState};
use agentflow::worker::safety::SafetyPolicy;
use agentflow::worker::{Worker, WorkerSettings};

async fn start_master() -> (TempDir, SqlitePool, String) {
    let dir = TempDir::new().unwrap();
    let pool = db::connection::open(&dir.path().join("master.db"))
        .await
        .unwrap();

    let state = AppState::new(pool.clone(), Config::default());
    let app = router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (dir, pool, format!("http://{}", addr))
}

fn remote_settings(master_url: &str, group: &str, id: &str) -> WorkerSettings {
    WorkerSettings {
        id: Some(id.to_string()),
        master_url: master_url.to_string(),
        db_path: None,
        group: Some(group.to_string()),
        // Closed port: the Claude HTTP level never answers its probe.
        claude: ClaudeConfig {
            server_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        },
        safety: SafetyPolicy::default(),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn remote_one_shot_completes_a_task() {
    let (_dir, pool, master_url) = start_master().await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/api/v1/tasks", master_url))
        .json(&json!({
            "title": "remote echo",
            "description": "shell: echo remote-ok",
            "group_name": "e2e",
        }))
        .send()
        .await
        .unwrap();
    let task_id = response.json::<serde_json::Value>().await.unwrap()["task_id"]
        .as_i64()
        .unwrap();

    let worker = Worker::new(remote_settings(&master_url, "e2e", "e2e-w1"))
        .await
        .unwrap();
    let result = worker.run_one_shot().await.unwrap().unwrap();
    assert!(result.contains("remote-ok"));

    let task = db::tasks::get(&pool, task_id).await.unwrap().unwrap();
    assert_eq!(task.status, "completed");
    assert!(task.result.unwrap().contains("remote-ok"));
    assert_eq!(task.lock_holder, None);

    // Registration flowed through the API into the store.
    let registered = db::workers::get(&pool, "e2e-w1").await.unwrap().unwrap();
    assert_eq!(registered.group_name, "e2e");
    assert_eq!(registered.worker_type, "remote");
}

#[tokio::test]
async fn remote_one_shot_with_empty_queue_exits_clean() {
    let (_dir, _pool, master_url) = start_master().await;

    let worker = Worker::new(remote_settings(&master_url, "idle", "idle-w1"))
        .await
        .unwrap();
    let result = worker.run_one_shot().await.unwrap();
    assert!(result.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn two_workers_race_one_task() {
    let (_dir, pool, master_url) = start_master().await;

    let client = reqwest::Client::new();
    client
        .post(format!("{}/api/v1/tasks", master_url))
        .json(&json!({
            "title": "contested",
            "description": "shell: echo winner",
            "group_name": "race",
        }))
        .send()
        .await
        .unwrap();

    let w1 = Worker::new(remote_settings(&master_url, "race", "race-w1"))
        .await
        .unwrap();
    let w2 = Worker::new(remote_settings(&master_url, "race", "race-w2"))
        .await
        .unwrap();

    let (r1, r2) = tokio::join!(w1.run_one_shot(), w2.run_one_shot());

    // Exactly one worker completes the task; the other observes no work.
    let outcomes = [r1.unwrap(), r2.unwrap()];
    let winners = outcomes.iter().filter(|r| r.is_some()).count();
    assert_eq!(winners, 1);

    let tasks = db::tasks::list(&pool, Some("completed"), Some("race"))
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].lock_holder, None);
}
