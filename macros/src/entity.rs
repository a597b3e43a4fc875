use crate::field_parser::{self, FieldDef, FieldDefs, Role};
use proc_macro2::{Ident, TokenStream};
use quote::{format_ident, quote};
use syn::ItemStruct;

fn marker(role: Role) -> TokenStream {
    match role {
        Role::Key => quote! { ::rowtrack::FieldMarker::Key },
        Role::Concurrency => quote! { ::rowtrack::FieldMarker::Concurrency },
        Role::Optional => quote! { ::rowtrack::FieldMarker::Optional },
        Role::LoadedAt => quote! { ::rowtrack::FieldMarker::LoadedAt },
        _ => quote! { ::rowtrack::FieldMarker::Required },
    }
}

fn field_shape(entity: &Ident, field: &FieldDef) -> TokenStream {
    let field_name = &field.name;
    let field_type = &field.tpe;
    let name_lit = field_name.to_string();
    let column = match &field.column {
        Some(lit) => quote! { ::core::option::Option::Some(#lit) },
        None => quote! { ::core::option::Option::None },
    };
    let marker = marker(field.role);
    quote! {
        {
            fn get(entity: &#entity) -> ::rowtrack::Value {
                ::rowtrack::ToColumn::to_column(&entity.#field_name)
            }
            fn set(entity: &mut #entity, value: &::rowtrack::Value) -> ::core::result::Result<(), ::rowtrack::ColumnError> {
                entity.#field_name = <#field_type as ::rowtrack::FromColumn>::from_column(value)?;
                ::core::result::Result::Ok(())
            }
            fn coerce(value: &::rowtrack::Value) -> ::core::result::Result<::rowtrack::Value, ::rowtrack::ColumnError> {
                <#field_type as ::rowtrack::FromColumn>::from_column(value).map(|v| ::rowtrack::ToColumn::to_column(&v))
            }
            ::rowtrack::FieldShape {
                name: #name_lit,
                column: #column,
                marker: #marker,
                declared: <#field_type as ::rowtrack::FromColumn>::KIND,
                get,
                set,
                coerce,
            }
        }
    }
}

fn notifier_accessor(entity: &Ident, notifier: &Option<FieldDef>) -> TokenStream {
    match notifier {
        Some(FieldDef { name, role: Role::Notifier { values }, .. }) => {
            let kind = if *values { quote! { ::rowtrack::NotifyKind::WithValues } } else { quote! { ::rowtrack::NotifyKind::Plain } };
            quote! {
                ::core::option::Option::Some((#kind, {
                    fn notifier(entity: &mut #entity) -> &mut ::rowtrack::ChangeNotifier {
                        &mut entity.#name
                    }
                    notifier as fn(&mut #entity) -> &mut ::rowtrack::ChangeNotifier
                }))
            }
        }
        _ => quote! { ::core::option::Option::None },
    }
}

/// `set_<field>` methods that assign and publish the change when the column value differs.
fn notifying_setters(entity: &Ident, defs: &FieldDefs) -> TokenStream {
    let Some(FieldDef { name: notifier, role: Role::Notifier { values }, .. }) = &defs.notifier else {
        return quote! {};
    };
    let setters = defs.fields.iter().filter(|f| f.role.is_settable()).map(|field| {
        let field_name = &field.name;
        let field_type = &field.tpe;
        let vis = &field.vis;
        let name_lit = field_name.to_string();
        let setter = format_ident!("set_{}", field_name);
        let publish = if *values {
            quote! { self.#notifier.changed_values(#name_lit, old, new); }
        } else {
            quote! { self.#notifier.changed(#name_lit); }
        };
        quote! {
            #[allow(dead_code)]
            #vis fn #setter(&mut self, value: #field_type) {
                let old = ::rowtrack::ToColumn::to_column(&self.#field_name);
                let new = ::rowtrack::ToColumn::to_column(&value);
                self.#field_name = value;
                if old != new {
                    #publish
                }
            }
        }
    });
    quote! {
        impl #entity {
            #(#setters)*
        }
    }
}

pub fn new(item_struct: &ItemStruct) -> Result<TokenStream, syn::Error> {
    let entity = &item_struct.ident;
    let fields = field_parser::get_named_fields(item_struct)?;
    let defs = field_parser::get_field_macros(&fields)?;

    let type_name = entity.to_string();
    let shapes = defs.fields.iter().filter(|f| f.role.is_mapped()).map(|f| field_shape(entity, f));
    let ignored = defs.fields.iter().filter(|f| f.role == Role::Transient).map(|f| f.name.to_string());
    let notifier = notifier_accessor(entity, &defs.notifier);
    let setters = notifying_setters(entity, &defs);

    Ok(quote! {
        impl ::rowtrack::Entity for #entity {
            fn entity_shape() -> ::rowtrack::EntityShape<Self> {
                ::rowtrack::EntityShape {
                    type_name: #type_name,
                    fields: ::std::vec![#(#shapes),*],
                    ignored: ::std::vec![#(#ignored),*],
                    notifier: #notifier,
                }
            }
        }
        #setters
    })
}
