use crate::domain::group::{
    AdmissionRequest, Admitted, Group, GroupId, GroupStatus, Membership, NewGroup, Transition,
};
use crate::domain::money::Money;
use crate::domain::order::{
    CaptureRecord, NewOrder, Order, OrderId, OrderStatus, Payment, PaymentStatus, ReleaseRecord,
    StatusChange,
};
use crate::domain::ports::{GroupStore, OrderStore, ProductStore, UserStore};
use crate::domain::product::{Product, ProductId};
use crate::domain::user::{UserId, UserStats};
use crate::error::{GroupBuyError, Rejection, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::*;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const CF_PRODUCTS: &str = "products";
pub const CF_USERS: &str = "users";
pub const CF_GROUPS: &str = "groups";
/// Keyed by group id then user id, so a group's members are one prefix scan.
pub const CF_MEMBERS: &str = "members";
pub const CF_ORDERS: &str = "orders";
pub const CF_PAYMENTS: &str = "payments";
/// Id sequences.
pub const CF_META: &str = "meta";

const ALL_CFS: [&str; 7] = [
    CF_PRODUCTS,
    CF_USERS,
    CF_GROUPS,
    CF_MEMBERS,
    CF_ORDERS,
    CF_PAYMENTS,
    CF_META,
];

const SEQ_GROUP: &[u8] = b"seq:group";
const SEQ_ORDER: &[u8] = b"seq:order";

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn member_key(group_id: GroupId, user_id: UserId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&group_id.to_be_bytes());
    key[8..].copy_from_slice(&user_id.to_be_bytes());
    key
}

/// A persistent store implementation using RocksDB.
///
/// Each entity lives in its own column family as JSON. Reads go straight to the
/// database; every conditional update runs under a single write mutex and commits
/// through one `WriteBatch`, so a multi-record change is applied entirely or not at all.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| GroupBuyError::StorageError(format!("Column family '{name}' not found")))
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_pinned_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        self.scan_prefix(cf, &[])
    }

    fn scan_prefix<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let iter = self
            .db
            .iterator_cf(self.cf(cf)?, IteratorMode::From(prefix, Direction::Forward));
        let mut items = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }

    fn put_json<T: Serialize>(&self, batch: &mut WriteBatch, cf: &str, key: &[u8], value: &T) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn next_id(&self, batch: &mut WriteBatch, seq: &[u8]) -> Result<u64> {
        let last: u64 = self.get_json(CF_META, seq)?.unwrap_or_default();
        let next = last + 1;
        self.put_json(batch, CF_META, seq, &next)?;
        Ok(next)
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.db.write(batch)?;
        Ok(())
    }

    fn load_group(&self, id: GroupId) -> Result<Option<Group>> {
        self.get_json(CF_GROUPS, &id_key(id))
    }

    fn check_lockstep(&self, group: &Group) -> Result<()> {
        let rows = self
            .scan_prefix::<Membership>(CF_MEMBERS, &id_key(group.id))?
            .len();
        if rows != group.current_count as usize {
            error!(
                "🧮 Group #{} count is {} but it has {rows} membership rows",
                group.id, group.current_count
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ProductStore for RocksDBStore {
    async fn upsert_product(&self, product: Product) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_PRODUCTS, &id_key(product.id), &product)?;
        self.commit(batch)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        self.get_json(CF_PRODUCTS, &id_key(id))
    }
}

#[async_trait]
impl UserStore for RocksDBStore {
    async fn upsert_user(&self, user: UserStats) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_USERS, &id_key(user.id), &user)?;
        self.commit(batch)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserStats>> {
        self.get_json(CF_USERS, &id_key(id))
    }

    async fn credit_savings(&self, id: UserId, amount: Money) -> Result<Option<UserStats>> {
        let _guard = self.write_lock.lock().await;
        let Some(mut user) = self.get_json::<UserStats>(CF_USERS, &id_key(id))? else {
            return Ok(None);
        };
        user.total_savings += amount;
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_USERS, &id_key(id), &user)?;
        self.commit(batch)?;
        Ok(Some(user))
    }
}

#[async_trait]
impl GroupStore for RocksDBStore {
    async fn create_group(&self, new: NewGroup) -> Result<Group> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self
            .scan::<Group>(CF_GROUPS)?
            .into_iter()
            .find(|g| g.product_id == new.product_id && g.is_active())
        {
            return Err(Rejection::ActiveGroupExists(existing.id).into());
        }

        let mut batch = WriteBatch::default();
        let group = new.into_group(self.next_id(&mut batch, SEQ_GROUP)?);
        self.put_json(&mut batch, CF_GROUPS, &id_key(group.id), &group)?;
        let creator = Membership {
            group_id: group.id,
            user_id: group.creator_id,
            invited_by: None,
            joined_at: group.created_at,
        };
        self.put_json(
            &mut batch,
            CF_MEMBERS,
            &member_key(group.id, creator.user_id),
            &creator,
        )?;
        if let Some(mut user) = self.get_json::<UserStats>(CF_USERS, &id_key(group.creator_id))? {
            user.groups_organized += 1;
            self.put_json(&mut batch, CF_USERS, &id_key(user.id), &user)?;
        }
        self.commit(batch)?;
        Ok(group)
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        self.load_group(id)
    }

    async fn groups_by_status(&self, status: GroupStatus) -> Result<Vec<Group>> {
        let mut groups = self.scan::<Group>(CF_GROUPS)?;
        groups.retain(|g| g.status == status);
        Ok(groups)
    }

    async fn expired_active_groups(&self, now: DateTime<Utc>) -> Result<Vec<Group>> {
        let mut groups = self.scan::<Group>(CF_GROUPS)?;
        groups.retain(|g| g.is_active() && g.is_expired(now));
        Ok(groups)
    }

    async fn admit_member(&self, request: AdmissionRequest) -> Result<Admitted> {
        let _guard = self.write_lock.lock().await;
        let mut group = self
            .load_group(request.group_id)?
            .ok_or(Rejection::GroupNotFound)?;
        let key = member_key(request.group_id, request.user_id);
        let already_member = self.db.get_pinned_cf(self.cf(CF_MEMBERS)?, key)?.is_some();

        let previous_count = group.current_count;
        let closed = group.admit(already_member, request.at, request.close_when_full)?;

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_GROUPS, &id_key(group.id), &group)?;
        self.put_json(
            &mut batch,
            CF_MEMBERS,
            &key,
            &Membership {
                group_id: request.group_id,
                user_id: request.user_id,
                invited_by: request.invited_by,
                joined_at: request.at,
            },
        )?;
        if let Some(referrer_id) = request.referrer()
            && let Some(mut referrer) = self.get_json::<UserStats>(CF_USERS, &id_key(referrer_id))?
        {
            referrer.invited_count += 1;
            self.put_json(&mut batch, CF_USERS, &id_key(referrer_id), &referrer)?;
        }
        self.commit(batch)?;
        self.check_lockstep(&group)?;

        Ok(Admitted {
            group,
            previous_count,
            closed,
        })
    }

    async fn remove_member(&self, group_id: GroupId, user_id: UserId) -> Result<Group> {
        let _guard = self.write_lock.lock().await;
        let mut group = self.load_group(group_id)?.ok_or(Rejection::GroupNotFound)?;
        let key = member_key(group_id, user_id);
        let is_member = self.db.get_pinned_cf(self.cf(CF_MEMBERS)?, key)?.is_some();
        group.release(user_id, is_member)?;

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_GROUPS, &id_key(group_id), &group)?;
        batch.delete_cf(self.cf(CF_MEMBERS)?, key);
        self.commit(batch)?;
        self.check_lockstep(&group)?;
        Ok(group)
    }

    async fn transition_group(
        &self,
        group_id: GroupId,
        to: GroupStatus,
        at: DateTime<Utc>,
    ) -> Result<Transition> {
        let _guard = self.write_lock.lock().await;
        let mut group = self
            .load_group(group_id)?
            .ok_or(Rejection::GroupNotFound)?;
        if !group.transition(to, at) {
            return Ok(Transition::Unchanged(group));
        }
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_GROUPS, &id_key(group_id), &group)?;
        self.commit(batch)?;
        Ok(Transition::Applied(group))
    }

    async fn close_expired(&self, group_id: GroupId, at: DateTime<Utc>) -> Result<Transition> {
        let _guard = self.write_lock.lock().await;
        let mut group = self.load_group(group_id)?.ok_or(Rejection::GroupNotFound)?;
        if !group.close_expired(at) {
            return Ok(Transition::Unchanged(group));
        }
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_GROUPS, &id_key(group_id), &group)?;
        self.commit(batch)?;
        self.check_lockstep(&group)?;
        Ok(Transition::Applied(group))
    }

    async fn members(&self, group_id: GroupId) -> Result<Vec<Membership>> {
        self.scan_prefix(CF_MEMBERS, &id_key(group_id))
    }

    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        let key = member_key(group_id, user_id);
        Ok(self.db.get_pinned_cf(self.cf(CF_MEMBERS)?, key)?.is_some())
    }

    async fn member_groups(&self, user_id: UserId) -> Result<Vec<Group>> {
        let mut groups = Vec::new();
        for membership in self.scan::<Membership>(CF_MEMBERS)? {
            if membership.user_id == user_id
                && let Some(group) = self.load_group(membership.group_id)?
            {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    async fn organized_groups(&self, user_id: UserId) -> Result<Vec<Group>> {
        let mut groups = self.scan::<Group>(CF_GROUPS)?;
        groups.retain(|g| g.creator_id == user_id);
        Ok(groups)
    }

    async fn invitations_by(&self, user_id: UserId) -> Result<u32> {
        let count = self
            .scan::<Membership>(CF_MEMBERS)?
            .iter()
            .filter(|m| m.invited_by == Some(user_id) && m.user_id != user_id)
            .count();
        Ok(count as u32)
    }
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn insert_order(&self, new: NewOrder) -> Result<Order> {
        let _guard = self.write_lock.lock().await;
        if self
            .scan::<Order>(CF_ORDERS)?
            .iter()
            .any(|o| o.group_id == new.group_id && o.user_id == new.user_id && o.status.is_live())
        {
            return Err(Rejection::OrderAlreadyExists.into());
        }
        let mut batch = WriteBatch::default();
        let order = new.into_order(self.next_id(&mut batch, SEQ_ORDER)?);
        let payment = Payment::pending(order.id, order.total_amount, order.created_at);
        self.put_json(&mut batch, CF_ORDERS, &id_key(order.id), &order)?;
        self.put_json(&mut batch, CF_PAYMENTS, &id_key(order.id), &payment)?;
        self.commit(batch)?;
        Ok(order)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        self.get_json(CF_ORDERS, &id_key(id))
    }

    async fn orders_for_group(
        &self,
        group_id: GroupId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>> {
        let mut orders = self.scan::<Order>(CF_ORDERS)?;
        orders.retain(|o| o.group_id == group_id && status.is_none_or(|s| o.status == s));
        Ok(orders)
    }

    async fn live_order_for(&self, group_id: GroupId, user_id: UserId) -> Result<Option<Order>> {
        Ok(self
            .scan::<Order>(CF_ORDERS)?
            .into_iter()
            .find(|o| o.group_id == group_id && o.user_id == user_id && o.status.is_live()))
    }

    async fn all_orders(&self) -> Result<Vec<Order>> {
        self.scan(CF_ORDERS)
    }

    async fn get_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        self.get_json(CF_PAYMENTS, &id_key(order_id))
    }

    async fn attach_hold(&self, order_id: OrderId, hold_ref: String, at: DateTime<Utc>) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(mut payment) = self.get_json::<Payment>(CF_PAYMENTS, &id_key(order_id))? else {
            return Ok(false);
        };
        if payment.status != PaymentStatus::Pending {
            return Ok(false);
        }
        payment.status = PaymentStatus::Frozen;
        payment.external_ref = Some(hold_ref);
        payment.updated_at = at;
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_PAYMENTS, &id_key(order_id), &payment)?;
        self.commit(batch)?;
        Ok(true)
    }

    async fn advance_order(&self, order_id: OrderId, from: OrderStatus, change: StatusChange) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(mut order) = self.get_json::<Order>(CF_ORDERS, &id_key(order_id))? else {
            return Ok(false);
        };
        if !order.advance(from, change) {
            return Ok(false);
        }
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_ORDERS, &id_key(order_id), &order)?;
        self.commit(batch)?;
        Ok(true)
    }

    async fn record_capture(&self, capture: CaptureRecord) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let key = id_key(capture.order_id);
        let Some(mut order) = self.get_json::<Order>(CF_ORDERS, &key)? else {
            return Ok(false);
        };
        if order.status != OrderStatus::Frozen {
            return Ok(false);
        }
        let at = capture.change.timestamp;
        order.final_price = capture.final_price;
        order.total_amount = capture.captured;
        order.advance(OrderStatus::Frozen, capture.change);

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_ORDERS, &key, &order)?;
        if let Some(mut payment) = self.get_json::<Payment>(CF_PAYMENTS, &key)? {
            payment.status = PaymentStatus::Charged;
            payment.captured_amount = Some(capture.captured);
            payment.updated_at = at;
            self.put_json(&mut batch, CF_PAYMENTS, &key, &payment)?;
        }
        if let Some(mut buyer) = self.get_json::<UserStats>(CF_USERS, &id_key(capture.buyer))? {
            buyer.record_purchase(capture.savings);
            self.put_json(&mut batch, CF_USERS, &id_key(buyer.id), &buyer)?;
        }
        self.commit(batch)?;
        Ok(true)
    }

    async fn record_release(&self, release: ReleaseRecord) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let key = id_key(release.order_id);
        let Some(mut order) = self.get_json::<Order>(CF_ORDERS, &key)? else {
            return Ok(false);
        };
        let at = release.change.timestamp;
        if !order.advance(release.from, release.change) {
            return Ok(false);
        }
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_ORDERS, &key, &order)?;
        if let Some(mut payment) = self.get_json::<Payment>(CF_PAYMENTS, &key)? {
            payment.status = release.payment_status;
            payment.updated_at = at;
            self.put_json(&mut batch, CF_PAYMENTS, &key, &payment)?;
        }
        self.commit(batch)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::group::GroupLimits;
    use crate::domain::money::Amount;
    use crate::domain::pricing::{PriceSchedule, PriceTier};
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");
        for name in ALL_CFS {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_product_round_trip() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let product = Product {
            id: 3,
            name: "Blender".to_string(),
            schedule: PriceSchedule::new(
                Amount::new(dec!(9000)).unwrap(),
                vec![PriceTier::new(5, dec!(7500)).unwrap()],
            )
            .unwrap(),
            active: true,
            stock: 4,
        };
        store.upsert_product(product.clone()).await.unwrap();
        assert_eq!(store.get_product(3).await.unwrap(), Some(product));
        assert!(store.get_product(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rocksdb_admission_and_members_prefix() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        store.upsert_user(UserStats::new(1)).await.unwrap();
        let now = Utc::now();
        let new_group = |product_id| NewGroup {
            product_id,
            creator_id: 1,
            limits: GroupLimits::new(2, 2).unwrap(),
            created_at: now,
            deadline: now + Duration::days(1),
        };
        let first = store.create_group(new_group(1)).await.unwrap();
        let second = store.create_group(new_group(2)).await.unwrap();
        assert_eq!((first.id, second.id), (1, 2));
        assert_eq!(store.get_user(1).await.unwrap().unwrap().groups_organized, 2);

        let admitted = store
            .admit_member(AdmissionRequest {
                group_id: first.id,
                user_id: 7,
                invited_by: Some(1),
                at: now,
                close_when_full: true,
            })
            .await
            .unwrap();
        assert!(admitted.closed);
        assert_eq!(store.get_user(1).await.unwrap().unwrap().invited_count, 1);
        assert_eq!(store.members(first.id).await.unwrap().len(), 2);
        assert_eq!(store.members(second.id).await.unwrap().len(), 1);
        assert_eq!(
            store.groups_by_status(GroupStatus::Completed).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_rocksdb_close_expired_and_single_live_order() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        store.upsert_user(UserStats::new(1)).await.unwrap();
        let now = Utc::now();
        let group = store
            .create_group(NewGroup {
                product_id: 1,
                creator_id: 1,
                limits: GroupLimits::new(2, 5).unwrap(),
                created_at: now,
                deadline: now + Duration::days(1),
            })
            .await
            .unwrap();

        let order = NewOrder {
            group_id: group.id,
            user_id: 1,
            final_price: Money::new(dec!(9000)),
            delivery: crate::domain::order::DeliveryType::Post,
            delivery_cost: Money::new(dec!(350)),
            invited_by: None,
            created_at: now,
        };
        store.insert_order(order.clone()).await.unwrap();
        let err = store.insert_order(order).await.unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::OrderAlreadyExists));

        assert!(!store.close_expired(group.id, now).await.unwrap().applied());
        let closed = store
            .close_expired(group.id, now + Duration::days(2))
            .await
            .unwrap();
        assert!(closed.applied());
        assert_eq!(closed.group().status, GroupStatus::Failed);
        assert_eq!(
            store.get_group(group.id).await.unwrap().unwrap().status,
            GroupStatus::Failed
        );
    }
}
