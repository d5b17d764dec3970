//! Inter-agent message routing.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::types::{AgentId, ContextId, InternalMessage, Message, TaskId};

/// Default number of messages returned by one receive.
pub const DEFAULT_RECEIVE_LIMIT: usize = 10;

/// A message about to be sent.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub from: Option<AgentId>,
    pub to: AgentId,
    pub message: Message,
}

impl OutgoingMessage {
    pub fn new(to: AgentId, message: Message) -> Self {
        Self {
            from: None,
            to,
            message,
        }
    }

    #[must_use]
    pub fn from_agent(mut self, from: AgentId) -> Self {
        self.from = Some(from);
        self
    }

    #[must_use]
    pub fn in_task(mut self, task_id: TaskId) -> Self {
        self.message.task_id = Some(task_id);
        self
    }

    #[must_use]
    pub fn in_context(mut self, context_id: ContextId) -> Self {
        self.message.context_id = Some(context_id);
        self
    }
}

/// Delivers messages into per-agent queues. Never deletes them.
pub struct MessageRouter {
    storage: Arc<dyn Storage>,
}

impl MessageRouter {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Queue a message for a registered agent.
    ///
    /// When the message names a task, it is also appended to that task's
    /// history. That append is best-effort and never fails the send.
    #[instrument(
        name = "message::send",
        skip(self, outgoing),
        fields(to = %outgoing.to, from = ?outgoing.from.as_ref().map(AgentId::as_str))
    )]
    pub async fn send(&self, outgoing: OutgoingMessage) -> Result<InternalMessage> {
        if self.storage.get_agent(&outgoing.to).await?.is_none() {
            return Err(Error::RecipientNotFound(outgoing.to.to_string()));
        }

        let task_id = outgoing.message.task_id.clone();
        let queued = self
            .storage
            .send_message(InternalMessage::new(
                outgoing.from,
                outgoing.to,
                outgoing.message,
            ))
            .await?;
        debug!(message_id = %queued.id, "Message queued");

        if let Some(task_id) = task_id
            && let Err(e) = self.append_to_task(&task_id, &queued.message).await
        {
            warn!(task_id = %task_id, error = %e, "Failed to append message to task history");
        }

        Ok(queued)
    }

    async fn append_to_task(&self, task_id: &TaskId, message: &Message) -> Result<()> {
        let Some(mut task) = self.storage.get_task(task_id).await? else {
            debug!(task_id = %task_id, "Message names an unknown task");
            return Ok(());
        };
        task.history.push(message.clone());
        self.storage.update_task(task).await?;
        Ok(())
    }

    /// Up to `limit` unread messages for an agent, oldest first.
    #[instrument(name = "message::receive", skip(self, agent_id), fields(agent_id = %agent_id))]
    pub async fn receive(
        &self,
        agent_id: &AgentId,
        mark_as_read: bool,
        limit: usize,
    ) -> Result<Vec<InternalMessage>> {
        self.ensure_agent(agent_id).await?;
        let messages = self
            .storage
            .receive_messages(agent_id, mark_as_read, limit)
            .await?;
        debug!(count = messages.len(), mark_as_read, "Messages received");
        Ok(messages)
    }

    /// Every message queued for an agent, read or unread.
    pub async fn history(&self, agent_id: &AgentId) -> Result<Vec<InternalMessage>> {
        self.ensure_agent(agent_id).await?;
        self.storage.get_all_messages(agent_id).await
    }

    async fn ensure_agent(&self, agent_id: &AgentId) -> Result<()> {
        match self.storage.get_agent(agent_id).await? {
            Some(_) => Ok(()),
            None => Err(Error::agent_not_found(agent_id)),
        }
    }
}
