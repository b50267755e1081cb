//! Integration tests for the master HTTP API.
//!
//! Each test boots the full axum app on an ephemeral port with its own
//! temporary database and drives it over real sockets with reqwest.

use std::net::SocketAddr;

use reqwest::StatusCode;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;

use agentflow::config::Config;
use agentflow::db;
use agentflow::master::server::{router, AppState};

struct TestMaster {
    _dir: TempDir,
    pool: SqlitePool,
    base_url: String,
    client: reqwest::Client,
}

impl TestMaster {
    async fn start() -> Self {
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

        Self {
            _dir: dir,
            pool,
            base_url: format!("http://{}", addr),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn create_task(&self, title: &str, group: &str) -> i64 {
        let response = self
            .client
            .post(self.url("/api/v1/tasks"))
            .json(&json!({ "title": title, "description": "shell: echo hi", "group_name": group }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: Value = response.json().await.unwrap();
        body["task_id"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn health_endpoint_answers() {
    let master = TestMaster::start().await;

    let response = master.client.get(master.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_validates_and_returns_id() {
    let master = TestMaster::start().await;

    let id = master.create_task("first", "default").await;
    assert!(id > 0);

    // Missing title is a 400 before any state change.
    let response = master
        .client
        .post(master.url("/api/v1/tasks"))
        .json(&json!({ "title": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("title"));
}

#[tokio::test]
async fn get_task_and_not_found() {
    let master = TestMaster::start().await;
    let id = master.create_task("fetch me", "default").await;

    let response = master
        .client
        .get(master.url(&format!("/api/v1/tasks/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let task: Value = response.json().await.unwrap();
    assert_eq!(task["title"], "fetch me");
    assert_eq!(task["status"], "pending");

    let response = master
        .client
        .get(master.url("/api/v1/tasks/999999"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_rejects_unknown_status() {
    let master = TestMaster::start().await;

    let response = master
        .client
        .get(master.url("/api/v1/tasks?status=bogus"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn pending_is_204_when_empty() {
    let master = TestMaster::start().await;

    let response = master
        .client
        .get(master.url("/api/v1/tasks/pending?group=empty-group"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    master.create_task("work", "busy-group").await;
    let response = master
        .client
        .get(master.url("/api/v1/tasks/pending?group=busy-group"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["tasks"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn lock_contention_over_http() {
    let master = TestMaster::start().await;
    let id = master.create_task("contested", "default").await;

    let lock = |worker: &str| {
        let client = master.client.clone();
        let url = master.url(&format!("/api/v1/tasks/{}/lock", id));
        let body = json!({ "worker_id": worker });
        async move { client.post(url).json(&body).send().await.unwrap() }
    };

    let first = lock("w1").await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = lock("w2").await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["status"], "already_locked");

    // Unknown task id: 404, not a silent conflict.
    let response = master
        .client
        .post(master.url("/api/v1/tasks/424242/lock"))
        .json(&json!({ "worker_id": "w1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn complete_is_holder_guarded_and_idempotent() {
    let master = TestMaster::start().await;
    let id = master.create_task("reportable", "default").await;

    master
        .client
        .post(master.url(&format!("/api/v1/tasks/{}/lock", id)))
        .json(&json!({ "worker_id": "w1" }))
        .send()
        .await
        .unwrap();

    // Wrong worker: 409 and no state change.
    let response = master
        .client
        .post(master.url(&format!("/api/v1/tasks/{}/complete", id)))
        .json(&json!({ "worker_id": "w2", "result": "stolen" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let task = db::tasks::get(&master.pool, id).await.unwrap().unwrap();
    assert_eq!(task.status, "running");

    // Holder: 200.
    let response = master
        .client
        .post(master.url(&format!("/api/v1/tasks/{}/complete", id)))
        .json(&json!({ "worker_id": "w1", "result": "done" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Retrying the same report is an idempotent 200.
    let response = master
        .client
        .post(master.url(&format!("/api/v1/tasks/{}/complete", id)))
        .json(&json!({ "worker_id": "w1", "result": "done" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let task = db::tasks::get(&master.pool, id).await.unwrap().unwrap();
    assert_eq!(task.status, "completed");
    assert_eq!(task.result.as_deref(), Some("done"));
    assert_eq!(task.lock_holder, None);
}

#[tokio::test]
async fn fail_report_stores_error() {
    let master = TestMaster::start().await;
    let id = master.create_task("doomed", "default").await;

    master
        .client
        .post(master.url(&format!("/api/v1/tasks/{}/lock", id)))
        .json(&json!({ "worker_id": "w1" }))
        .send()
        .await
        .unwrap();

    let response = master
        .client
        .post(master.url(&format!("/api/v1/tasks/{}/fail", id)))
        .json(&json!({ "worker_id": "w1", "error": "subprocess exploded" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let task = db::tasks::get(&master.pool, id).await.unwrap().unwrap();
    assert_eq!(task.status, "failed");
    assert_eq!(task.error.as_deref(), Some("subprocess exploded"));
    assert_eq!(task.result, None);
}

#[tokio::test]
async fn unlock_returns_task_to_pending() {
    let master = TestMaster::start().await;
    let id = master.create_task("release me", "default").await;

    master
        .client
        .post(master.url(&format!("/api/v1/tasks/{}/lock", id)))
        .json(&json!({ "worker_id": "w1" }))
        .send()
        .await
        .unwrap();

    let response = master
        .client
        .post(master.url(&format!("/api/v1/tasks/{}/unlock", id)))
        .json(&json!({ "worker_id": "w1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let task = db::tasks::get(&master.pool, id).await.unwrap().unwrap();
    assert_eq!(task.status, "pending");
    assert_eq!(task.lock_holder, None);
}

#[tokio::test]
async fn worker_registration_and_heartbeat() {
    let master = TestMaster::start().await;

    // Heartbeat for an unknown worker is a 404.
    let response = master
        .client
        .post(master.url("/api/v1/workers/ghost/heartbeat"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = master
        .client
        .post(master.url("/api/v1/workers/linux-7/register"))
        .json(&json!({ "group_name": "linux", "worker_type": "remote" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = master
        .client
        .post(master.url("/api/v1/workers/linux-7/heartbeat"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = master
        .client
        .get(master.url("/api/v1/workers?group=linux"))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    let workers = body["workers"].as_array().unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0]["id"], "linux-7");
    assert_eq!(workers[0]["status"], "active");
}

#[tokio::test]
async fn stats_track_lifecycle() {
    let master = TestMaster::start().await;

    let a = master.create_task("a", "g1").await;
    master.create_task("b", "g1").await;
    master.create_task("c", "g2").await;

    master
        .client
        .post(master.url(&format!("/api/v1/tasks/{}/lock", a)))
        .json(&json!({ "worker_id": "w1" }))
        .send()
        .await
        .unwrap();
    master
        .client
        .post(master.url(&format!("/api/v1/tasks/{}/complete", a)))
        .json(&json!({ "worker_id": "w1", "result": "ok" }))
        .send()
        .await
        .unwrap();

    let response = master.client.get(master.url("/api/v1/stats")).send().await.unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["stats"]["total_tasks"], 3);
    assert_eq!(body["stats"]["completed_tasks"], 1);
    assert_eq!(body["stats"]["pending_tasks"], 2);

    let response = master
        .client
        .get(master.url("/api/v1/stats/groups"))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    let groups = body["group_stats"].as_array().unwrap();
    assert_eq!(groups.len(), 2);
    let g1 = groups.iter().find(|g| g["group_name"] == "g1").unwrap();
    assert_eq!(g1["total_tasks"], 2);
    assert_eq!(g1["completed_tasks"], 1);
}
