use chrono::{DateTime, Utc};
use rowtrack::*;

#[derive(ColumnEnum, Debug, Default, Clone, Copy, PartialEq)]
pub enum Priority {
    #[default]
    Low,
    High = 10,
}

#[derive(Entity, Debug, Default)]
pub struct Ticket {
    #[key]
    #[column(name = "TicketId")]
    pub id: i64,
    #[concurrency]
    pub stamp: Vec<u8>,
    #[column]
    pub title: String,
    pub priority: Priority,
    pub initial: char,
    #[column(optional)]
    pub closed_at: Option<DateTime<Utc>>,
    #[column(loaded_at)]
    pub seen_at: DateTime<Utc>,
    #[column(transient)]
    pub cached_render: Option<String>,
}

fn main() {
    let descriptor = EntityDescriptor::<Ticket>::of().unwrap();
    assert_eq!(descriptor.key_field().unwrap().column(), "TicketId");
    assert_eq!(descriptor.kind_of("cached_render"), Some(FieldKind::Ignored));
    assert_eq!(Priority::from_column(&Value::I64(10)).unwrap(), Priority::High);
    assert_eq!(Priority::High.to_column(), Value::I64(10));
}
