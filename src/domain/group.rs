use crate::domain::product::ProductId;
use crate::domain::user::UserId;
use crate::error::{GroupBuyError, Rejection};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type GroupId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl GroupStatus {
    pub fn is_terminal(self) -> bool {
        self != GroupStatus::Active
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupStatus::Active => "active",
            GroupStatus::Completed => "completed",
            GroupStatus::Failed => "failed",
            GroupStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Headcount bounds, validated so that `2 <= min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLimits {
    min_participants: u32,
    max_participants: u32,
}

impl GroupLimits {
    pub fn new(min_participants: u32, max_participants: u32) -> Result<Self, GroupBuyError> {
        if min_participants < 2 {
            return Err(GroupBuyError::ValidationError(
                "A group needs a minimum of at least 2 participants".to_string(),
            ));
        }
        if max_participants < min_participants {
            return Err(GroupBuyError::ValidationError(format!(
                "Maximum participants ({max_participants}) is below the minimum ({min_participants})"
            )));
        }
        Ok(Self {
            min_participants,
            max_participants,
        })
    }

    pub fn min(&self) -> u32 {
        self.min_participants
    }

    pub fn max(&self) -> u32 {
        self.max_participants
    }
}

/// A group that has been validated but not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroup {
    pub product_id: ProductId,
    pub creator_id: UserId,
    pub limits: GroupLimits,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl NewGroup {
    /// The creator is the first member, so a fresh group starts at one.
    pub fn into_group(self, id: GroupId) -> Group {
        Group {
            id,
            product_id: self.product_id,
            creator_id: self.creator_id,
            status: GroupStatus::Active,
            min_participants: self.limits.min(),
            max_participants: self.limits.max(),
            current_count: 1,
            created_at: self.created_at,
            deadline: self.deadline,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub product_id: ProductId,
    pub creator_id: UserId,
    pub status: GroupStatus,
    pub min_participants: u32,
    pub max_participants: u32,
    pub current_count: u32,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    /// Set by whichever terminal transition happened.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Group {
    pub fn is_active(&self) -> bool {
        self.status == GroupStatus::Active
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline < now
    }

    pub fn reached_minimum(&self) -> bool {
        self.current_count >= self.min_participants
    }

    /// Checks, in order, every reason a user could be turned away.
    pub fn check_admission(&self, already_member: bool, now: DateTime<Utc>) -> Result<(), Rejection> {
        if !self.is_active() {
            return Err(Rejection::GroupNotActive(self.status));
        }
        if now > self.deadline {
            return Err(Rejection::DeadlinePassed);
        }
        if already_member {
            return Err(Rejection::AlreadyMember);
        }
        if self.current_count >= self.max_participants {
            return Err(Rejection::GroupFull);
        }
        Ok(())
    }

    /// Takes one more member. Returns `true` if that filled the group and, with
    /// `close_when_full`, completed it in the same step.
    ///
    /// Callers must hold whatever lock makes this read-modify-write atomic.
    pub fn admit(
        &mut self,
        already_member: bool,
        now: DateTime<Utc>,
        close_when_full: bool,
    ) -> Result<bool, Rejection> {
        self.check_admission(already_member, now)?;
        self.current_count += 1;
        if close_when_full && self.current_count >= self.max_participants {
            self.transition(GroupStatus::Completed, now);
            return Ok(true);
        }
        Ok(false)
    }

    pub fn check_removal(&self, user_id: UserId, is_member: bool) -> Result<(), Rejection> {
        if !self.is_active() {
            return Err(Rejection::GroupNotActive(self.status));
        }
        if user_id == self.creator_id {
            return Err(Rejection::CreatorCannotLeave);
        }
        if !is_member {
            return Err(Rejection::NotAMember);
        }
        Ok(())
    }

    pub fn release(&mut self, user_id: UserId, is_member: bool) -> Result<(), Rejection> {
        self.check_removal(user_id, is_member)?;
        self.current_count = self.current_count.saturating_sub(1);
        Ok(())
    }

    /// Where an expired group goes on its current headcount. `None` while the deadline
    /// has not passed or the group is already terminal.
    pub fn expiry_outcome(&self, now: DateTime<Utc>) -> Option<GroupStatus> {
        if !self.is_active() || !self.is_expired(now) {
            return None;
        }
        Some(if self.reached_minimum() {
            GroupStatus::Completed
        } else {
            GroupStatus::Failed
        })
    }

    /// Closes an expired group as completed or failed. The headcount is read here, so
    /// callers must hold the same lock that guards joins and leaves.
    pub fn close_expired(&mut self, now: DateTime<Utc>) -> bool {
        match self.expiry_outcome(now) {
            Some(to) => self.transition(to, now),
            None => false,
        }
    }

    /// Moves an active group to a terminal status. Returns `false`, changing nothing,
    /// if the group already left `Active`.
    pub fn transition(&mut self, to: GroupStatus, at: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || !to.is_terminal() {
            return false;
        }
        self.status = to;
        self.completed_at = Some(at);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub invited_by: Option<UserId>,
    pub joined_at: DateTime<Utc>,
}

/// A join request as handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionRequest {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub invited_by: Option<UserId>,
    pub at: DateTime<Utc>,
    pub close_when_full: bool,
}

impl AdmissionRequest {
    /// Referrals only count when someone other than the joiner did the inviting.
    pub fn referrer(&self) -> Option<UserId> {
        self.invited_by.filter(|inviter| *inviter != self.user_id)
    }
}

/// A successful admission, as seen from inside the store's critical section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    /// The group right after the increment (and auto-completion, if it happened).
    pub group: Group,
    pub previous_count: u32,
    pub closed: bool,
}

/// Result of a compare-and-swap on a group's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// This call moved the group; the snapshot is taken at the moment of the swap.
    Applied(Group),
    /// Nothing changed: the group was already terminal, or not yet due.
    Unchanged(Group),
}

impl Transition {
    pub fn group(&self) -> &Group {
        match self {
            Transition::Applied(g) | Transition::Unchanged(g) => g,
        }
    }

    pub fn applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn group(min: u32, max: u32) -> Group {
        let now = Utc::now();
        NewGroup {
            product_id: 1,
            creator_id: 10,
            limits: GroupLimits::new(min, max).unwrap(),
            created_at: now,
            deadline: now + Duration::days(7),
        }
        .into_group(1)
    }

    #[test]
    fn test_limits_validation() {
        assert!(GroupLimits::new(2, 2).is_ok());
        assert!(matches!(
            GroupLimits::new(1, 5),
            Err(GroupBuyError::ValidationError(_))
        ));
        assert!(matches!(
            GroupLimits::new(5, 4),
            Err(GroupBuyError::ValidationError(_))
        ));
    }

    #[test]
    fn test_new_group_starts_with_creator() {
        let g = group(3, 10);
        assert_eq!(g.current_count, 1);
        assert_eq!(g.status, GroupStatus::Active);
        assert!(g.completed_at.is_none());
    }

    #[test]
    fn test_admission_checks_in_order() {
        let now = Utc::now();
        let mut g = group(2, 2);

        assert_eq!(g.check_admission(true, now), Err(Rejection::AlreadyMember));
        assert_eq!(
            g.check_admission(false, g.deadline + Duration::seconds(1)),
            Err(Rejection::DeadlinePassed)
        );

        g.current_count = 2;
        assert_eq!(g.check_admission(false, now), Err(Rejection::GroupFull));

        g.status = GroupStatus::Failed;
        assert_eq!(
            g.check_admission(false, now),
            Err(Rejection::GroupNotActive(GroupStatus::Failed))
        );
    }

    #[test]
    fn test_admit_closes_full_group() {
        let now = Utc::now();
        let mut g = group(2, 3);
        assert_eq!(g.admit(false, now, true), Ok(false));
        assert_eq!(g.admit(false, now, true), Ok(true));
        assert_eq!(g.current_count, 3);
        assert_eq!(g.status, GroupStatus::Completed);
        assert_eq!(g.completed_at, Some(now));
        assert_eq!(
            g.admit(false, now, true),
            Err(Rejection::GroupNotActive(GroupStatus::Completed))
        );
    }

    #[test]
    fn test_release_rules() {
        let mut g = group(2, 5);
        g.current_count = 2;
        assert_eq!(g.release(10, true), Err(Rejection::CreatorCannotLeave));
        assert_eq!(g.release(11, false), Err(Rejection::NotAMember));
        assert_eq!(g.release(11, true), Ok(()));
        assert_eq!(g.current_count, 1);
    }

    #[test]
    fn test_transition_is_one_shot() {
        let now = Utc::now();
        let mut g = group(2, 5);
        assert!(!g.transition(GroupStatus::Active, now));
        assert!(g.transition(GroupStatus::Cancelled, now));
        assert!(!g.transition(GroupStatus::Completed, now));
        assert_eq!(g.status, GroupStatus::Cancelled);
    }

    #[test]
    fn test_close_expired_uses_current_headcount() {
        let now = Utc::now();
        let mut g = group(2, 5);
        assert_eq!(g.expiry_outcome(now), None);
        assert!(!g.close_expired(now));

        let later = now + Duration::days(30);
        assert_eq!(g.expiry_outcome(later), Some(GroupStatus::Failed));
        g.admit(false, now, false).unwrap();
        assert_eq!(g.expiry_outcome(later), Some(GroupStatus::Completed));
        g.release(11, true).unwrap();
        assert!(g.close_expired(later));
        assert_eq!(g.status, GroupStatus::Failed);
        assert!(!g.close_expired(later));
    }

    #[test]
    fn test_referrer_ignores_self_invites() {
        let req = AdmissionRequest {
            group_id: 1,
            user_id: 5,
            invited_by: Some(5),
            at: Utc::now(),
            close_when_full: true,
        };
        assert_eq!(req.referrer(), None);
        let req = AdmissionRequest {
            invited_by: Some(6),
            ..req
        };
        assert_eq!(req.referrer(), Some(6));
    }
}
