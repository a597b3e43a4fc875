extern crate proc_macro;
mod column_enum;
mod entity;
mod field_parser;
mod macro_utils;

use proc_macro::TokenStream;
use proc_macro_error::proc_macro_error;
use syn::{parse_macro_input, DeriveInput, ItemStruct};

/// Implements `rowtrack::Entity` for a struct with named fields.
///
/// Field attributes:
/// - `#[key]` the identity-map key, at most one
/// - `#[concurrency]` the optimistic-concurrency token, at most one, requires a key
/// - `#[column(name = "..")]` bind to a differently named column
/// - `#[column(optional)]` the column may be absent, the field is never reconciled
/// - `#[column(loaded_at)]` a `DateTime<Utc>` stamped whenever the row is applied
/// - `#[column(transient)]` never read or written by hydration
/// - `#[notifier]` / `#[notifier(values)]` a `ChangeNotifier` field; generates `set_<field>` methods
///
/// Every other field is required: its column must be present and its edits are tracked.
#[proc_macro_derive(Entity, attributes(key, concurrency, column, notifier))]
#[proc_macro_error]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let item_struct = parse_macro_input!(input as ItemStruct);
    let stream = match entity::new(&item_struct) {
        Ok(stream) => stream,
        Err(e) => return e.to_compile_error().into(),
    };
    macro_utils::submit_struct_to_stream(stream, "entity", &item_struct.ident, "_derive.rs")
}

/// Maps a fieldless enum to a column holding either its discriminant or its variant name.
#[proc_macro_derive(ColumnEnum)]
#[proc_macro_error]
pub fn derive_column_enum(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let stream = match column_enum::new(&ast) {
        Ok(stream) => stream,
        Err(e) => return e.to_compile_error().into(),
    };
    macro_utils::submit_struct_to_stream(stream, "column_enum", &ast.ident, "_derive.rs")
}
