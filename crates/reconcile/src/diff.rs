//! Plan summaries for previews

use crate::planner::{MutationPlan, Operation};

/// Counts over a set of plans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    /// Users with at least one operation
    pub users_changed: usize,
    /// Users already in the requested state
    pub users_unchanged: usize,
    /// Group additions and policy attachments
    pub additions: usize,
    /// Everything that removes, detaches or deactivates
    pub removals: usize,
    /// Users that would be deleted
    pub deletions: usize,
    /// Warnings across all plans
    pub warnings: usize,
}

impl PlanSummary {
    /// Create a summary from a list of plans
    pub fn from_plans<'a>(plans: impl IntoIterator<Item = &'a MutationPlan>) -> Self {
        let mut summary = Self::default();
        for plan in plans {
            summary.add_plan(plan);
        }
        summary
    }

    /// Add one plan to the summary
    pub fn add_plan(&mut self, plan: &MutationPlan) {
        if plan.is_empty() {
            self.users_unchanged += 1;
        } else {
            self.users_changed += 1;
        }
        for operation in &plan.operations {
            if matches!(operation, Operation::DeleteUser { .. }) {
                self.deletions += 1;
            } else if operation.is_removal() {
                self.removals += 1;
            } else {
                self.additions += 1;
            }
        }
        self.warnings += plan.warnings.len();
    }

    /// Total number of operations
    pub fn total_operations(&self) -> usize {
        self.additions + self.removals + self.deletions
    }

    /// Check if there is nothing to apply
    pub fn is_empty(&self) -> bool {
        self.total_operations() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, IntendedAction};
    use crate::planner::{PlanOptions, interpret};
    use iamkit::UserSnapshot;
    use iamkit::backend::memory::MemoryUser;

    #[test]
    fn test_summary_counts() {
        let mut alice = UserSnapshot::empty(MemoryUser::new("alice").record);
        alice.groups.insert("Admins".to_string());
        let bob = UserSnapshot::empty(MemoryUser::new("bob").record);
        let options = PlanOptions::default();

        let plans = vec![
            interpret(
                &IntendedAction::new("alice", ActionKind::ChangeGroups).with_groups(&["Dev"]),
                &alice,
                &options,
            ),
            interpret(&IntendedAction::new("bob", ActionKind::Delete), &bob, &options),
            interpret(&IntendedAction::new("bob", ActionKind::AddGroup), &bob, &options),
        ];

        let summary = PlanSummary::from_plans(&plans);

        assert_eq!(summary.users_changed, 2);
        assert_eq!(summary.users_unchanged, 1);
        assert_eq!(summary.additions, 1);
        assert_eq!(summary.removals, 1);
        assert_eq!(summary.deletions, 1);
        assert_eq!(summary.warnings, 1);
        assert_eq!(summary.total_operations(), 3);
        assert!(!summary.is_empty());
    }

    #[test]
    fn test_empty_summary() {
        assert!(PlanSummary::from_plans(std::iter::empty()).is_empty());
    }
}
