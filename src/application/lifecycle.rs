use crate::config::EngineConfig;
use crate::domain::clock::ClockHandle;
use crate::domain::group::{AdmissionRequest, Group, GroupId, GroupLimits, GroupStatus, NewGroup, Transition};
use crate::domain::money::Money;
use crate::domain::pricing::share_text;
use crate::domain::product::{Product, ProductId};
use crate::domain::ports::{GroupStore, ProductStore, StoreHandle, UserStore};
use crate::domain::user::{UserId, UserStats};
use crate::error::{GroupBuyError, Rejection, Result};
use chrono::Duration;
use log::*;
use serde::Serialize;
use std::sync::Arc;

/// Parameters for a new group. Unset limits fall back to the configured defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateGroup {
    pub product_id: ProductId,
    pub creator_id: UserId,
    pub min_participants: Option<u32>,
    pub max_participants: Option<u32>,
    pub deadline_days: Option<u32>,
}

impl CreateGroup {
    pub fn new(product_id: ProductId, creator_id: UserId) -> Self {
        Self {
            product_id,
            creator_id,
            min_participants: None,
            max_participants: None,
            deadline_days: None,
        }
    }

    pub fn with_limits(mut self, min: u32, max: u32) -> Self {
        self.min_participants = Some(min);
        self.max_participants = Some(max);
        self
    }

    pub fn with_deadline_days(mut self, days: u32) -> Self {
        self.deadline_days = Some(days);
        self
    }
}

/// What a successful join looked like from the joiner's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinReceipt {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub current_count: u32,
    pub current_price: Money,
    /// Only set when this join lowered the price.
    pub previous_price: Option<Money>,
    pub price_dropped: bool,
    /// This join filled the group and completed it.
    pub closed: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStatusChange {
    pub group_id: GroupId,
    pub old_status: GroupStatus,
    pub new_status: GroupStatus,
    pub participants: u32,
    /// Set on completion only.
    pub final_price: Option<Money>,
}

impl GroupStatusChange {
    /// `false` when the group was already terminal and nothing happened.
    pub fn changed(&self) -> bool {
        self.old_status != self.new_status
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareData {
    pub text: String,
    pub url: String,
    pub button_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemberStats {
    pub participated: u32,
    pub active: u32,
    pub completed: u32,
    pub failed: u32,
    pub cancelled: u32,
    pub organized: u32,
    pub people_invited: u32,
}

/// Owns every group state transition.
///
/// Capacity, membership and status checks are delegated to the store's atomic operations;
/// this type adds validation, pricing and the side effects that follow a transition.
#[derive(Clone)]
pub struct GroupLifecycleManager {
    store: StoreHandle,
    clock: ClockHandle,
    config: Arc<EngineConfig>,
}

impl GroupLifecycleManager {
    pub fn new(store: StoreHandle, clock: ClockHandle, config: Arc<EngineConfig>) -> Self {
        Self { store, clock, config }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    async fn product(&self, id: ProductId) -> Result<Product> {
        self.store
            .get_product(id)
            .await?
            .ok_or_else(|| Rejection::ProductNotFound.into())
    }

    async fn user(&self, id: UserId) -> Result<UserStats> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| Rejection::UserNotFound.into())
    }

    pub async fn create(&self, request: CreateGroup) -> Result<Group> {
        let min = request
            .min_participants
            .unwrap_or(self.config.default_min_participants);
        let max = request
            .max_participants
            .unwrap_or(self.config.default_max_participants);
        let limits = GroupLimits::new(min, max)?;
        let days = request.deadline_days.unwrap_or(self.config.default_deadline_days);
        if days == 0 {
            return Err(GroupBuyError::ValidationError(
                "A group must run for at least one day".to_string(),
            ));
        }

        let product = self.product(request.product_id).await?;
        if !product.active {
            return Err(Rejection::ProductInactive.into());
        }
        if product.stock == 0 {
            return Err(Rejection::OutOfStock.into());
        }
        self.user(request.creator_id).await?;

        let now = self.clock.now();
        let group = self
            .store
            .create_group(NewGroup {
                product_id: product.id,
                creator_id: request.creator_id,
                limits,
                created_at: now,
                deadline: now + Duration::days(i64::from(days)),
            })
            .await?;
        info!(
            "🛍️ Group #{} for '{}' created by user {} ({}..{} participants, closes {})",
            group.id, product.name, group.creator_id, min, max, group.deadline
        );
        Ok(group)
    }

    pub async fn join(
        &self,
        group_id: GroupId,
        user_id: UserId,
        invited_by: Option<UserId>,
    ) -> Result<JoinReceipt> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or(Rejection::GroupNotFound)?;
        self.user(user_id).await?;
        let product = self.product(group.product_id).await?;

        let admitted = self
            .store
            .admit_member(AdmissionRequest {
                group_id,
                user_id,
                invited_by,
                at: self.clock.now(),
                close_when_full: true,
            })
            .await?;

        let schedule = &product.schedule;
        let previous_price = schedule.current_price(admitted.previous_count);
        let current_count = admitted.group.current_count;
        let current_price = schedule.current_price(current_count);
        let price_dropped = current_price < previous_price;
        debug!("🛍️ User {user_id} joined group #{group_id}, now {current_count} members at {current_price}");

        if admitted.closed {
            info!("🛍️ Group #{group_id} is full and has been completed");
            self.on_completed(&admitted.group).await?;
        }

        let message = if price_dropped {
            format!("Great! The price dropped to {}!", current_price.display_whole())
        } else if let Some(next) = schedule.next_tier(current_count) {
            format!("You're in! {} more people and the price drops!", next.people_needed)
        } else {
            "You joined the group!".to_string()
        };

        Ok(JoinReceipt {
            group_id,
            user_id,
            current_count,
            current_price,
            previous_price: price_dropped.then_some(previous_price),
            price_dropped,
            closed: admitted.closed,
            message,
        })
    }

    pub async fn leave(&self, group_id: GroupId, user_id: UserId) -> Result<Group> {
        let group = self.store.remove_member(group_id, user_id).await?;
        debug!("🛍️ User {user_id} left group #{group_id}, {} members remain", group.current_count);
        Ok(group)
    }

    pub async fn complete(&self, group_id: GroupId) -> Result<GroupStatusChange> {
        let transition = self
            .store
            .transition_group(group_id, GroupStatus::Completed, self.clock.now())
            .await?;
        let final_price = match &transition {
            Transition::Applied(group) => {
                info!("🛍️ Group #{group_id} completed with {} members", group.current_count);
                Some(self.on_completed(group).await?)
            }
            Transition::Unchanged(_) => None,
        };
        Ok(status_change(&transition, final_price))
    }

    pub async fn fail(&self, group_id: GroupId) -> Result<GroupStatusChange> {
        let transition = self
            .store
            .transition_group(group_id, GroupStatus::Failed, self.clock.now())
            .await?;
        if transition.applied() {
            info!(
                "🛍️ Group #{group_id} failed with {} of {} required members",
                transition.group().current_count,
                transition.group().min_participants
            );
        }
        Ok(status_change(&transition, None))
    }

    /// Completes or fails a group past its deadline, deciding on the headcount at the
    /// moment of the swap. A member leaving while the sweep runs cannot tip a group
    /// below its minimum into `Completed`.
    pub async fn close_expired(&self, group_id: GroupId) -> Result<GroupStatusChange> {
        let transition = self.store.close_expired(group_id, self.clock.now()).await?;
        let final_price = match &transition {
            Transition::Applied(group) if group.status == GroupStatus::Completed => {
                info!("🛍️ Expired group #{group_id} completed with {} members", group.current_count);
                Some(self.on_completed(group).await?)
            }
            Transition::Applied(group) => {
                info!(
                    "🛍️ Expired group #{group_id} failed with {} of {} required members",
                    group.current_count, group.min_participants
                );
                None
            }
            Transition::Unchanged(_) => None,
        };
        Ok(status_change(&transition, final_price))
    }

    /// Creator-only. A group that is already terminal is left as it is.
    pub async fn cancel(&self, group_id: GroupId, requester: UserId) -> Result<GroupStatusChange> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or(Rejection::GroupNotFound)?;
        if group.creator_id != requester {
            return Err(GroupBuyError::PermissionDenied(
                "Only the group's creator can cancel it".to_string(),
            ));
        }
        let transition = self
            .store
            .transition_group(group_id, GroupStatus::Cancelled, self.clock.now())
            .await?;
        if transition.applied() {
            info!("🛍️ Group #{group_id} cancelled by its creator");
        }
        Ok(status_change(&transition, None))
    }

    /// Runs once per group, by whichever caller won the transition to `Completed`.
    /// Returns the authoritative final price.
    async fn on_completed(&self, group: &Group) -> Result<Money> {
        let members = self.store.members(group.id).await?;
        if members.len() != group.current_count as usize {
            let err = GroupBuyError::InvariantViolation(format!(
                "group #{} completed with count {} but {} membership rows",
                group.id,
                group.current_count,
                members.len()
            ));
            error!("🚨️ {err}");
        }

        let product = self.product(group.product_id).await?;
        let final_price = product.schedule.current_price(group.current_count);
        let Some(creator) = self.store.get_user(group.creator_id).await? else {
            warn!("🛍️ Creator {} of group #{} is gone, no bonus credited", group.creator_id, group.id);
            return Ok(final_price);
        };
        let bonus = self
            .config
            .bonus
            .bonus(final_price, group.current_count, creator.level);
        if bonus.is_positive() {
            self.store.credit_savings(creator.id, bonus).await?;
            info!(
                "🎁️ Organizer {} ({}) credited {bonus} for group #{}",
                creator.id, creator.level, group.id
            );
        }
        Ok(final_price)
    }

    pub async fn share_data(&self, group_id: GroupId, user_id: UserId) -> Result<ShareData> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or(Rejection::GroupNotFound)?;
        let product = self.product(group.product_id).await?;
        let schedule = &product.schedule;
        Ok(ShareData {
            text: share_text(
                &product.name,
                schedule.tiers(),
                schedule.base_price(),
                group.current_count,
            ),
            url: format!(
                "https://t.me/{}/app?startapp=g_{group_id}_r_{user_id}",
                self.config.bot_username
            ),
            button_text: "Join".to_string(),
        })
    }

    pub async fn member_stats(&self, user_id: UserId) -> Result<MemberStats> {
        let groups = self.store.member_groups(user_id).await?;
        let mut stats = MemberStats {
            participated: groups.len() as u32,
            ..Default::default()
        };
        for group in &groups {
            match group.status {
                GroupStatus::Active => stats.active += 1,
                GroupStatus::Completed => stats.completed += 1,
                GroupStatus::Failed => stats.failed += 1,
                GroupStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats.organized = self.store.organized_groups(user_id).await?.len() as u32;
        stats.people_invited = self.store.invitations_by(user_id).await?;
        Ok(stats)
    }
}

fn status_change(transition: &Transition, final_price: Option<Money>) -> GroupStatusChange {
    let group = transition.group();
    let old_status = match transition {
        Transition::Applied(_) => GroupStatus::Active,
        Transition::Unchanged(g) => g.status,
    };
    GroupStatusChange {
        group_id: group.id,
        old_status,
        new_status: group.status,
        participants: group.current_count,
        final_price,
    }
}
