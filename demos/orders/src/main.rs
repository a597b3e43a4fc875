use orders::store::{OrderTable, StoredOrder};
use orders::{settings_path, AppError, OrderRepository};
use rowtrack::log::{info, warn, LevelFilter};
use rowtrack::{logger, EngineSettings};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    logger::init(LevelFilter::Debug)?;
    let settings = EngineSettings::new(&settings_path())?;
    info!("{:?}", settings);

    let table = Arc::new(OrderTable::default());
    table.insert(1, StoredOrder::new("Alice", 120.0)).await;
    table.insert(2, StoredOrder::new("Dave", 80.0)).await;
    let repo = OrderRepository::new(settings, Arc::clone(&table));

    let orders = repo.all().await?;
    let alice = Arc::clone(&orders[0]);
    info!("loaded {} orders", orders.len());

    // another client bumps the amount, our local edit of the customer survives the reload
    alice.write().unwrap_or_else(|e| e.into_inner()).customer = "Bob".into();
    table.update(1, |o| o.amount = 150.0).await?;
    repo.by_id(1).await?;
    if let Some(handle) = repo.handle(1)? {
        info!("order 1 is {:?} with dirty fields {:?}", handle.state(), handle.dirty_fields());
    }

    // both sides change the customer: the database wins and the conflict is reported
    table.update(1, |o| o.customer = "Carol".into()).await?;
    match repo.by_id(1).await {
        Err(AppError::Track(err)) if err.conflict().is_some() => warn!("{}", err),
        other => info!("unexpected outcome {:?}", other.map(|o| o.is_some())),
    }

    repo.save(&alice).await?;
    info!("order 1 saved, customer {}", alice.read().unwrap_or_else(|e| e.into_inner()).customer);

    drop(orders);
    drop(alice);
    info!("pruned {} released orders", repo.engine().prune_invalid());

    for summary in repo.summaries().await? {
        info!("order {} amounts to {}", summary.id, summary.amount);
    }
    Ok(())
}
