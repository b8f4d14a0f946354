//! Read-only queries over an approval chain.
//!
//! Every query is total over a well-formed workflow. Mutation lives in
//! [`crate::approvals::engine`].

use std::collections::BTreeSet;

use crate::domain::approval::{ActorId, ApprovalLevel, ApprovalWorkflow};

impl ApprovalWorkflow {
    /// Level awaiting action, or `None` once the cursor has moved past the chain.
    pub fn current_level(&self) -> Option<&ApprovalLevel> {
        self.approval_chain.get(self.current_approval_level)
    }

    pub fn is_authorized(&self, actor_id: &ActorId) -> bool {
        self.current_level().is_some_and(|level| level.approver_ids.contains(actor_id))
    }

    pub fn is_terminal(&self) -> bool {
        self.overall_status.is_terminal()
    }

    /// True when the workflow is still open and the actor can decide its current level.
    pub fn is_awaiting(&self, actor_id: &ActorId) -> bool {
        !self.is_terminal() && self.is_authorized(actor_id)
    }

    pub fn involves(&self, actor_id: &ActorId) -> bool {
        self.requested_by == *actor_id
            || self.approval_chain.iter().any(|level| {
                level.approver_ids.contains(actor_id) || level.acted_by.as_ref() == Some(actor_id)
            })
    }

    pub fn pending_approvers(&self) -> BTreeSet<ActorId> {
        if self.is_terminal() {
            return BTreeSet::new();
        }
        self.current_level().map(|level| level.approver_ids.clone()).unwrap_or_default()
    }
}
