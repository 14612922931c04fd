//! Agent assignment coordination
//!
//! Selecting an agent for an escalating conversation is the one place where
//! correctness depends on serialized access to shared mutable state: two
//! escalations racing for the last slot on an agent must not both win.
//! All read-select-commit sequences run behind a single coordinator lock,
//! and online agent rows are additionally locked `FOR UPDATE` inside the
//! transaction so the load snapshot stays stable until the conversation row
//! is written.
//!
//! An empty candidate pool is not a failure: the conversation stays in
//! `agent` status with no assignment (the waiting queue) and is picked up
//! passively when an agent first touches it.

use std::sync::Arc;
use std::time::Duration;

use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use supportdesk_shared::AgentRow;

use crate::error::{ApiError, ApiResult};

/// An online agent considered for assignment, with its load snapshot.
#[derive(Debug, Clone)]
pub struct CandidateAgent {
    pub id: Uuid,
    pub active_count: i64,
    pub max_active_chats: i32,
    pub created_at: OffsetDateTime,
}

impl CandidateAgent {
    fn has_capacity(&self) -> bool {
        self.active_count < i64::from(self.max_active_chats.max(1))
    }
}

/// Pick the least-loaded agent with spare capacity. Ties break by earliest
/// registration, then id, so repeated runs over the same snapshot are
/// reproducible.
pub fn pick_agent(candidates: &[CandidateAgent]) -> Option<Uuid> {
    candidates
        .iter()
        .filter(|candidate| candidate.has_capacity())
        .min_by_key(|candidate| (candidate.active_count, candidate.created_at, candidate.id))
        .map(|candidate| candidate.id)
}

/// Serializes assignment decisions across concurrent escalations.
#[derive(Clone)]
pub struct AssignmentCoordinator {
    lock: Arc<Mutex<()>>,
    timeout: Duration,
}

impl AssignmentCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            timeout,
        }
    }

    /// Acquire the coordinator lock. The guard must be held until the
    /// enclosing transaction commits. Exceeding the bound surfaces as a
    /// retryable contention error rather than waiting indefinitely.
    pub async fn acquire(&self) -> ApiResult<OwnedMutexGuard<()>> {
        tokio::time::timeout(self.timeout, Arc::clone(&self.lock).lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!("Assignment lock acquisition timed out");
                ApiError::AssignmentContention
            })
    }

    /// Select an agent against a locked snapshot and commit the assignment
    /// onto the conversation row. Returns the assigned agent, or `None`
    /// when no eligible agent exists (the queued outcome).
    ///
    /// Caller must hold the coordinator lock and a `FOR UPDATE` lock on the
    /// conversation row.
    pub async fn select_and_assign(
        tx: &mut Transaction<'_, Postgres>,
        conversation_id: Uuid,
    ) -> ApiResult<Option<AgentRow>> {
        // Pin the online agent rows for the duration of the transaction so
        // the computed loads cannot drift under us.
        sqlx::query("SELECT id FROM agents WHERE presence = 'online' FOR UPDATE")
            .execute(&mut **tx)
            .await?;

        let candidates: Vec<CandidateAgent> = sqlx::query_as::<_, (Uuid, i64, i32, OffsetDateTime)>(
            r#"
            SELECT a.id,
                   (SELECT COUNT(*) FROM conversations c
                     WHERE c.assigned_agent_id = a.id AND c.status = 'agent') AS active_count,
                   a.max_active_chats,
                   a.created_at
            FROM agents a
            WHERE a.presence = 'online'
            "#,
        )
        .fetch_all(&mut **tx)
        .await?
        .into_iter()
        .map(|(id, active_count, max_active_chats, created_at)| CandidateAgent {
            id,
            active_count,
            max_active_chats,
            created_at,
        })
        .collect();

        let Some(agent_id) = pick_agent(&candidates) else {
            tracing::info!(
                conversation_id = %conversation_id,
                online_agents = candidates.len(),
                "No eligible agent, conversation queued"
            );
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE conversations
            SET assigned_agent_id = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .bind(agent_id)
        .execute(&mut **tx)
        .await?;

        let agent: AgentRow = sqlx::query_as(
            r#"
            SELECT id, display_name, presence::text AS presence, max_active_chats,
                   created_at, updated_at
            FROM agents
            WHERE id = $1
            "#,
        )
        .bind(agent_id)
        .fetch_one(&mut **tx)
        .await?;

        tracing::info!(
            conversation_id = %conversation_id,
            agent_id = %agent_id,
            "Conversation assigned to agent"
        );

        Ok(Some(agent))
    }
}
