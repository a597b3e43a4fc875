use crate::{ChangeNotifier, ColumnEnum, Entity};
use chrono::{DateTime, Utc};

#[derive(ColumnEnum, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    #[default]
    Pending,
    Shipped,
    Cancelled,
}

#[derive(Entity, Debug, Default)]
pub struct Order {
    #[key]
    #[column(name = "Id")]
    pub id: i32,
    #[concurrency]
    #[column(name = "RowVersion")]
    pub row_version: Vec<u8>,
    pub amount: f64,
    pub customer: String,
    pub status: OrderStatus,
    #[column(optional)]
    pub note: Option<String>,
    #[column(loaded_at)]
    pub loaded_at: Option<DateTime<Utc>>,
    #[column(transient)]
    pub scratch: Vec<String>,
}

#[derive(Entity, Debug, Default)]
pub struct NotifiedOrder {
    #[key]
    pub id: i32,
    #[concurrency]
    pub row_version: Vec<u8>,
    pub amount: f64,
    pub customer: String,
    #[notifier]
    pub events: ChangeNotifier,
}

#[derive(Entity, Debug, Default)]
pub struct AuditedOrder {
    #[key]
    pub id: i32,
    #[concurrency]
    pub row_version: Vec<u8>,
    pub amount: f64,
    pub customer: String,
    #[notifier(values)]
    pub events: ChangeNotifier,
}

#[derive(Entity, Debug, Default)]
pub struct Tag {
    pub name: String,
    pub weight: i32,
}

#[derive(Entity, Debug, Default)]
pub struct VersionedTag {
    #[concurrency]
    pub version: i64,
    pub name: String,
}

#[derive(Entity, Debug, Default)]
pub struct TwoKeys {
    #[key]
    pub a: i32,
    #[key]
    pub b: i32,
}

#[derive(Entity, Debug, Default)]
pub struct BadStamp {
    #[key]
    pub id: i32,
    #[column(loaded_at)]
    pub seen: i64,
}

#[derive(Entity, Debug, Default)]
pub struct Unversioned {
    #[key]
    pub id: i32,
    pub name: String,
}

#[derive(Entity, Debug, Default)]
pub struct Badge {
    #[key]
    pub id: i32,
    pub grade: char,
}
