//! Task chains: sequential, parallel, and tree compositions of tasks bound
//! to one external session.
//!
//! A chain is pure structure; executing the member tasks stays the workers'
//! job. Status transitions are monotone (pending → running → completed or
//! failed) and stamp `started_at`/`completed_at` exactly once.

use sqlx::SqlitePool;

use crate::db;
use crate::error::{AgentFlowError, Result};
use agentflow_types::{
    generate_chain_id, generate_message_uuid, ChainNode, ChainStatus, ChainType, TaskChain,
    TreeNodeDef,
};

pub struct ChainManager {
    pool: SqlitePool,
}

impl ChainManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// One node per task in the given order, `node_order` = 0..n-1.
    pub async fn create_sequential(
        &self,
        session_uuid: &str,
        task_ids: &[i64],
    ) -> Result<TaskChain> {
        let chain = self.insert_chain(session_uuid, ChainType::Sequential).await?;
        for (i, task_id) in task_ids.iter().enumerate() {
            db::chains::add_node(&self.pool, &chain.id, *task_id, None, i as i64).await?;
        }
        Ok(chain)
    }

    /// One node per task, all at `node_order` = 0.
    pub async fn create_parallel(&self, session_uuid: &str, task_ids: &[i64]) -> Result<TaskChain> {
        let chain = self.insert_chain(session_uuid, ChainType::Parallel).await?;
        for task_id in task_ids {
            db::chains::add_node(&self.pool, &chain.id, *task_id, None, 0).await?;
        }
        Ok(chain)
    }

    /// Parent/child structure. Each def's `parent_index` must point at an
    /// earlier def of the same list (which rules out cycles), and exactly one
    /// def is the root. Indexes are resolved to stored node ids as nodes are
    /// inserted.
    pub async fn create_tree(&self, session_uuid: &str, defs: &[TreeNodeDef]) -> Result<TaskChain> {
        let roots = defs.iter().filter(|d| d.parent_index.is_none()).count();
        if roots != 1 {
            return Err(AgentFlowError::InvalidArgument(format!(
                "tree chain needs exactly one root node, got {}",
                roots
            )));
        }
        for (i, def) in defs.iter().enumerate() {
            if let Some(parent) = def.parent_index {
                if parent >= i {
                    return Err(AgentFlowError::InvalidArgument(format!(
                        "node {} references parent index {} which is not an earlier node",
                        i, parent
                    )));
                }
            }
        }

        let chain = self.insert_chain(session_uuid, ChainType::Tree).await?;

        let mut inserted: Vec<i64> = Vec::with_capacity(defs.len());
        for (i, def) in defs.iter().enumerate() {
            let parent_node_id = def.parent_index.map(|p| inserted[p]);
            let node_id =
                db::chains::add_node(&self.pool, &chain.id, def.task_id, parent_node_id, i as i64)
                    .await?;
            inserted.push(node_id);
        }

        Ok(chain)
    }

    pub async fn get(&self, chain_id: &str) -> Result<TaskChain> {
        db::chains::get(&self.pool, chain_id)
            .await?
            .ok_or_else(|| AgentFlowError::ChainNotFound(chain_id.to_string()))
    }

    pub async fn nodes(&self, chain_id: &str) -> Result<Vec<ChainNode>> {
        db::chains::nodes(&self.pool, chain_id).await
    }

    pub async fn chains_by_session(&self, session_uuid: &str) -> Result<Vec<TaskChain>> {
        db::chains::list_by_session(&self.pool, session_uuid).await
    }

    /// Monotone status update: pending → running → completed | failed.
    /// Backward transitions are rejected.
    pub async fn update_status(&self, chain_id: &str, status: ChainStatus) -> Result<TaskChain> {
        let current = self.get(chain_id).await?;
        let from = current.status_enum();

        let allowed = match (from, status) {
            (a, b) if a == b => true,
            (ChainStatus::Pending, ChainStatus::Running) => true,
            (ChainStatus::Pending | ChainStatus::Running, s) if s.is_terminal() => true,
            _ => false,
        };
        if !allowed {
            return Err(AgentFlowError::Conflict(format!(
                "chain {} cannot move from {} to {}",
                chain_id,
                from.as_str(),
                status.as_str()
            )));
        }

        db::chains::update_status(&self.pool, chain_id, status).await?;
        self.get(chain_id).await
    }

    async fn insert_chain(&self, session_uuid: &str, chain_type: ChainType) -> Result<TaskChain> {
        let chain = TaskChain {
            id: generate_chain_id(),
            session_uuid: session_uuid.to_string(),
            root_message_uuid: generate_message_uuid(),
            chain_type: chain_type.as_str().to_string(),
            status: ChainStatus::Pending.as_str().to_string(),
            created_at: db::now(),
            started_at: None,
            completed_at: None,
        };
        db::chains::create(&self.pool, &chain).await?;
        Ok(chain)
    }
}
