#![allow(dead_code)]

use rowtrack::Entity;

#[derive(Entity)]
struct Pair(i32, i64);

fn main() {}
