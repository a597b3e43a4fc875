use proc_macro2::{Ident, Span};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::token::Comma;
use syn::{Fields, ItemStruct, LitStr, Type, Visibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Key,
    Concurrency,
    Required,
    Optional,
    LoadedAt,
    Transient,
    Notifier { values: bool },
}

impl Role {
    fn attr_name(&self) -> &'static str {
        match self {
            Role::Key => "#[key]",
            Role::Concurrency => "#[concurrency]",
            Role::Required => "#[column]",
            Role::Optional => "#[column(optional)]",
            Role::LoadedAt => "#[column(loaded_at)]",
            Role::Transient => "#[column(transient)]",
            Role::Notifier { .. } => "#[notifier]",
        }
    }

    pub fn is_mapped(&self) -> bool {
        !matches!(self, Role::Transient | Role::Notifier { .. })
    }

    /// Fields a notifier-carrying entity gets a `set_<field>` method for.
    pub fn is_settable(&self) -> bool {
        matches!(self, Role::Required | Role::Optional)
    }
}

#[derive(Clone)]
pub struct FieldDef {
    pub name: Ident,
    pub tpe: Type,
    pub vis: Visibility,
    pub role: Role,
    pub column: Option<LitStr>,
}

pub struct FieldDefs {
    pub fields: Vec<FieldDef>,
    pub notifier: Option<FieldDef>,
}

pub fn get_named_fields(ast: &ItemStruct) -> Result<Punctuated<syn::Field, Comma>, syn::Error> {
    if !ast.generics.params.is_empty() {
        return Err(syn::Error::new(ast.generics.params.span(), "`#[derive(Entity)]` does not support generic structs"));
    }
    match &ast.fields {
        Fields::Named(columns_named) => Ok(columns_named.named.clone()),
        _ => Err(syn::Error::new(ast.ident.span(), "`#[derive(Entity)]` only supports structs with named fields")),
    }
}

fn assign(role: &mut Option<Role>, new: Role, span: Span) -> Result<(), syn::Error> {
    match role {
        Some(existing) if *existing != new => Err(syn::Error::new(
            span,
            format!("{} cannot be combined with {}", new.attr_name(), existing.attr_name()),
        )),
        _ => {
            *role = Some(new);
            Ok(())
        }
    }
}

fn parse_entity_field(field: &syn::Field) -> Result<FieldDef, syn::Error> {
    let name = field.ident.clone().ok_or_else(|| syn::Error::new(field.span(), "Unnamed fields not supported"))?;
    let mut role: Option<Role> = None;
    let mut column: Option<LitStr> = None;

    for attr in &field.attrs {
        if attr.path().is_ident("key") {
            attr.meta.require_path_only()?;
            assign(&mut role, Role::Key, attr.path().span())?;
        } else if attr.path().is_ident("concurrency") {
            attr.meta.require_path_only()?;
            assign(&mut role, Role::Concurrency, attr.path().span())?;
        } else if attr.path().is_ident("notifier") {
            let mut values = false;
            if !matches!(attr.meta, syn::Meta::Path(_)) {
                attr.parse_nested_meta(|nested| {
                    if nested.path.is_ident("values") {
                        values = true;
                        Ok(())
                    } else {
                        Err(nested.error("expected `values`"))
                    }
                })?;
            }
            assign(&mut role, Role::Notifier { values }, attr.path().span())?;
        } else if attr.path().is_ident("column") {
            if matches!(attr.meta, syn::Meta::Path(_)) {
                continue;
            }
            attr.parse_nested_meta(|nested| {
                if nested.path.is_ident("name") {
                    column = Some(nested.value()?.parse::<LitStr>()?);
                    Ok(())
                } else if nested.path.is_ident("optional") {
                    assign(&mut role, Role::Optional, nested.path.span())
                } else if nested.path.is_ident("loaded_at") {
                    assign(&mut role, Role::LoadedAt, nested.path.span())
                } else if nested.path.is_ident("transient") {
                    assign(&mut role, Role::Transient, nested.path.span())
                } else {
                    Err(nested.error("expected one of `name = \"..\"`, `optional`, `loaded_at`, `transient`"))
                }
            })?;
        }
    }

    let role = role.unwrap_or(Role::Required);
    if let (Some(lit), false) = (&column, role.is_mapped()) {
        return Err(syn::Error::new(lit.span(), format!("{} fields are not mapped to a column", role.attr_name())));
    }
    Ok(FieldDef { name, tpe: field.ty.clone(), vis: field.vis.clone(), role, column })
}

pub fn get_field_macros(fields: &Punctuated<syn::Field, Comma>) -> Result<FieldDefs, syn::Error> {
    let mut defs = Vec::with_capacity(fields.len());
    let mut notifier: Option<FieldDef> = None;

    for field in fields.iter() {
        let def = parse_entity_field(field)?;
        if let Role::Notifier { .. } = def.role {
            if notifier.is_some() {
                return Err(syn::Error::new(def.name.span(), "Multiple `#[notifier]` fields found; only one is allowed"));
            }
            notifier = Some(def.clone());
        }
        defs.push(def);
    }

    Ok(FieldDefs { fields: defs, notifier })
}
