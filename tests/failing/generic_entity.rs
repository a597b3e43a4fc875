#![allow(dead_code)]

use rowtrack::Entity;

#[derive(Entity)]
struct Wrapper<T> {
    value: T,
}

fn main() {}
