pub mod store;

use rowtrack::chrono::{DateTime, Utc};
use rowtrack::{ColumnEnum, Engine, Entity, EngineSettings, Shared, TrackError, TrackedHandle, Value};
use std::sync::{Arc, PoisonError};
use store::{OrderTable, StoreError, StoredOrder};
use thiserror::Error;

#[derive(ColumnEnum, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    #[default]
    Placed,
    Paid,
    Shipped,
    Cancelled,
}

#[derive(Entity, Debug, Default)]
pub struct Order {
    #[key]
    pub id: i32,
    pub customer: String,
    pub amount: f64,
    pub status: OrderStatus,
    #[column(optional)]
    pub note: Option<String>,
    #[concurrency]
    #[column(name = "RowVersion")]
    pub row_version: Vec<u8>,
    #[column(loaded_at)]
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Narrow read model, never tracked.
#[derive(Entity, Debug, Default, PartialEq)]
pub struct OrderSummary {
    pub id: i32,
    pub amount: f64,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Track(#[from] TrackError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("settings: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("logger: {0}")]
    Logger(#[from] rowtrack::log::SetLoggerError),
}

pub fn settings_path() -> String {
    format!("{}/config/settings", env!("CARGO_MANIFEST_DIR"))
}

pub struct OrderRepository {
    engine: Engine,
    table: Arc<OrderTable>,
}

impl OrderRepository {
    pub fn new(settings: EngineSettings, table: Arc<OrderTable>) -> Self {
        Self { engine: Engine::new(settings), table }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn table(&self) -> &Arc<OrderTable> {
        &self.table
    }

    pub async fn all(&self) -> Result<Vec<Shared<Order>>, AppError> {
        let rows = self.table.select_all().await;
        Ok(self.engine.load(rows)?)
    }

    pub async fn by_id(&self, id: i32) -> Result<Option<Shared<Order>>, AppError> {
        let rows = self.table.select_by_id(id).await;
        Ok(self.engine.load(rows)?.pop())
    }

    pub async fn summaries(&self) -> Result<Vec<OrderSummary>, AppError> {
        let rows = self.table.select_summaries().await;
        Ok(self.engine.load_untracked(rows)?)
    }

    pub fn handle(&self, id: i32) -> Result<Option<Arc<TrackedHandle<Order>>>, AppError> {
        Ok(self.engine.tracker::<Order>().map_err(TrackError::from)?.handle(&id)?)
    }

    /// Writes the instance back with its current token and marks it clean under the new one.
    pub async fn save(&self, order: &Shared<Order>) -> Result<(), AppError> {
        let (id, expected, stored) = {
            let order = order.read().unwrap_or_else(PoisonError::into_inner);
            let stored = StoredOrder {
                note: order.note.clone(),
                status: order.status,
                ..StoredOrder::new(&order.customer, order.amount)
            };
            (order.id, order.row_version.clone(), stored)
        };
        let version = self.table.save(id, &expected, stored).await?;
        if let Some(handle) = self.handle(id)? {
            handle.accept_changes(Some(Value::Bytes(version)))?;
        }
        Ok(())
    }
}
