#![allow(dead_code)]

use rowtrack::{ChangeNotifier, Entity};

#[derive(Entity)]
struct Account {
    #[key]
    id: i32,
    #[notifier]
    changes: ChangeNotifier,
    #[notifier(values)]
    audit: ChangeNotifier,
}

fn main() {}
