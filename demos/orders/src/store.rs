use crate::OrderStatus;
use rowtrack::{RowSet, ToColumn, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("order {0} does not exist")]
    NotFound(i32),

    #[error("order {id} was saved against version {expected} but the table holds {actual}")]
    StaleVersion { id: i32, expected: Value, actual: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredOrder {
    pub customer: String,
    pub amount: f64,
    pub status: OrderStatus,
    pub note: Option<String>,
    pub(crate) version: u64,
}

impl StoredOrder {
    pub fn new(customer: &str, amount: f64) -> Self {
        Self { customer: customer.to_string(), amount, status: OrderStatus::Placed, note: None, version: 1 }
    }

    pub fn row_version(&self) -> Vec<u8> {
        self.version.to_be_bytes().to_vec()
    }
}

pub const COLUMNS: [&str; 6] = ["Id", "Customer", "Amount", "Status", "Note", "RowVersion"];

/// In-memory stand-in for an orders table with a rowversion column bumped on every write.
#[derive(Default)]
pub struct OrderTable {
    rows: RwLock<BTreeMap<i32, StoredOrder>>,
}

impl OrderTable {
    pub async fn insert(&self, id: i32, order: StoredOrder) {
        self.rows.write().await.insert(id, order);
    }

    fn row(id: i32, order: &StoredOrder) -> Vec<Value> {
        vec![
            Value::I32(id),
            order.customer.to_column(),
            Value::F64(order.amount),
            Value::Text(format!("{:?}", order.status)),
            order.note.to_column(),
            Value::Bytes(order.row_version()),
        ]
    }

    pub async fn select_all(&self) -> RowSet {
        let rows = self.rows.read().await;
        rows.iter().fold(RowSet::new(COLUMNS), |set, (id, order)| set.with_row(Self::row(*id, order)))
    }

    pub async fn select_by_id(&self, id: i32) -> RowSet {
        let rows = self.rows.read().await;
        let set = RowSet::new(COLUMNS);
        match rows.get(&id) {
            Some(order) => set.with_row(Self::row(id, order)),
            None => set,
        }
    }

    /// Projection without the customer column, the way a hand-written narrow query would look.
    pub async fn select_summaries(&self) -> RowSet {
        let rows = self.rows.read().await;
        rows.iter().fold(RowSet::new(["Id", "Amount", "RowVersion"]), |set, (id, order)| {
            set.with_row(vec![Value::I32(*id), Value::F64(order.amount), Value::Bytes(order.row_version())])
        })
    }

    /// Out-of-band write, as another client would do it. Returns the new row version.
    pub async fn update<F>(&self, id: i32, change: F) -> Result<Vec<u8>, StoreError>
    where
        F: FnOnce(&mut StoredOrder),
    {
        let mut rows = self.rows.write().await;
        let order = rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        change(order);
        order.version += 1;
        Ok(order.row_version())
    }

    /// Optimistic write: succeeds only if the stored version is still `expected`.
    pub async fn save(&self, id: i32, expected: &[u8], order: StoredOrder) -> Result<Vec<u8>, StoreError> {
        let mut rows = self.rows.write().await;
        let stored = rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if stored.row_version() != expected {
            return Err(StoreError::StaleVersion {
                id,
                expected: expected.to_column(),
                actual: Value::Bytes(stored.row_version()),
            });
        }
        let version = stored.version + 1;
        *stored = StoredOrder { version, ..order };
        Ok(stored.row_version())
    }
}
