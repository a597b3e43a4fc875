#![allow(dead_code)]

use rowtrack::Entity;

#[derive(Entity)]
struct Report {
    #[key]
    id: i32,
    #[column(transient, name = "Cache")]
    cache: String,
}

fn main() {}
