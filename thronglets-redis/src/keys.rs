//! Key layout.
//!
//! ```text
//! {prefix}agent:{id}                 agent JSON
//! {prefix}agents                     set of agent IDs
//! {prefix}task:{id}                  task JSON
//! {prefix}tasks                      set of task IDs
//! {prefix}tasks:context:{context}    set of task IDs per context
//! {prefix}tasks:status:{state}       set of task IDs per state
//! {prefix}tasks:by_time              zset of task IDs by status timestamp
//! {prefix}message:{id}               message JSON
//! {prefix}messages:{agent}           list of message IDs in send order
//! {prefix}messages:{agent}:unread    set of unread message IDs
//! {prefix}messages:{agent}:pending   list of unread message IDs in send order
//! {prefix}app:{id}                   app JSON
//! {prefix}apps                       set of app IDs
//! {prefix}apps:by_name               hash of app name to app ID
//! ```

use std::fmt::Display;

use thronglets_core::TaskState;

#[derive(Debug, Clone)]
pub(crate) struct Keys {
    prefix: String,
}

impl Keys {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub(crate) fn agent(&self, id: impl Display) -> String {
        format!("{}agent:{id}", self.prefix)
    }

    pub(crate) fn agents(&self) -> String {
        format!("{}agents", self.prefix)
    }

    pub(crate) fn task(&self, id: impl Display) -> String {
        format!("{}task:{id}", self.prefix)
    }

    pub(crate) fn tasks(&self) -> String {
        format!("{}tasks", self.prefix)
    }

    pub(crate) fn tasks_in_context(&self, context_id: impl Display) -> String {
        format!("{}tasks:context:{context_id}", self.prefix)
    }

    pub(crate) fn tasks_in_state(&self, state: TaskState) -> String {
        format!("{}tasks:status:{state}", self.prefix)
    }

    pub(crate) fn tasks_by_time(&self) -> String {
        format!("{}tasks:by_time", self.prefix)
    }

    pub(crate) fn message(&self, id: impl Display) -> String {
        format!("{}message:{id}", self.prefix)
    }

    pub(crate) fn queue(&self, agent_id: impl Display) -> String {
        format!("{}messages:{agent_id}", self.prefix)
    }

    pub(crate) fn unread(&self, agent_id: impl Display) -> String {
        format!("{}messages:{agent_id}:unread", self.prefix)
    }

    pub(crate) fn pending(&self, agent_id: impl Display) -> String {
        format!("{}messages:{agent_id}:pending", self.prefix)
    }

    pub(crate) fn app(&self, id: impl Display) -> String {
        format!("{}app:{id}", self.prefix)
    }

    pub(crate) fn apps(&self) -> String {
        format!("{}apps", self.prefix)
    }

    pub(crate) fn apps_by_name(&self) -> String {
        format!("{}apps:by_name", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_carry_prefix() {
        let keys = Keys::new("tb:");
        assert_eq!(keys.agent("a1"), "tb:agent:a1");
        assert_eq!(keys.tasks_in_state(TaskState::InputRequired), "tb:tasks:status:input_required");
        assert_eq!(keys.tasks_in_context("c1"), "tb:tasks:context:c1");
        assert_eq!(keys.unread("bob"), "tb:messages:bob:unread");
        assert_eq!(keys.pending("bob"), "tb:messages:bob:pending");
        assert_eq!(keys.apps_by_name(), "tb:apps:by_name");
    }
}
