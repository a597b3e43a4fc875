use rowtrack::*;

#[derive(Entity, Debug, Default)]
pub struct Account {
    #[key]
    pub id: i32,
    pub owner: String,
    #[column(optional)]
    pub nickname: Option<String>,
    #[notifier(values)]
    pub changes: ChangeNotifier,
}

#[derive(Entity, Debug, Default)]
struct Counter {
    #[key]
    id: i32,
    hits: i64,
    #[notifier]
    changes: ChangeNotifier,
}

fn main() {
    let mut account = Account::default();
    account.set_owner("alice".to_string());
    account.set_nickname(Some("al".to_string()));
    assert_eq!(account.owner, "alice");

    let mut counter = Counter::default();
    counter.set_hits(3);
    assert_eq!(counter.hits, 3);
    assert_eq!(EntityDescriptor::<Counter>::of().unwrap().mode(), DirtyCheckMode::Cached);
}
