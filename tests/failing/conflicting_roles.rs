#![allow(dead_code)]

use rowtrack::Entity;

#[derive(Entity)]
struct Order {
    #[key]
    #[column(optional)]
    id: i32,
}

fn main() {}
