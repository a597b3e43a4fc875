use proc_macro2::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::{Data, DeriveInput, Fields};

pub fn new(ast: &DeriveInput) -> Result<TokenStream, syn::Error> {
    let enum_ident = &ast.ident;
    if !ast.generics.params.is_empty() {
        return Err(syn::Error::new(ast.generics.span(), "`#[derive(ColumnEnum)]` does not support generic enums"));
    }
    let Data::Enum(data) = &ast.data else {
        return Err(syn::Error::new(ast.span(), "`#[derive(ColumnEnum)]` only supports enums"));
    };
    if data.variants.is_empty() {
        return Err(syn::Error::new(ast.span(), "`#[derive(ColumnEnum)]` needs at least one variant"));
    }
    if let Some(variant) = data.variants.iter().find(|v| !matches!(v.fields, Fields::Unit)) {
        return Err(syn::Error::new(variant.span(), "`#[derive(ColumnEnum)]` only supports fieldless variants"));
    }

    let variants: Vec<_> = data.variants.iter().map(|v| &v.ident).collect();
    let names: Vec<String> = variants.iter().map(|v| v.to_string()).collect();
    let enum_name = enum_ident.to_string();

    Ok(quote! {
        impl ::rowtrack::ColumnEnum for #enum_ident {
            const NAME: &'static str = #enum_name;

            fn from_ordinal(ordinal: i64) -> ::core::option::Option<Self> {
                #(
                    if ordinal == #enum_ident::#variants as i64 {
                        return ::core::option::Option::Some(#enum_ident::#variants);
                    }
                )*
                ::core::option::Option::None
            }

            fn from_name(name: &str) -> ::core::option::Option<Self> {
                #(
                    if name.eq_ignore_ascii_case(#names) {
                        return ::core::option::Option::Some(#enum_ident::#variants);
                    }
                )*
                ::core::option::Option::None
            }

            fn ordinal(&self) -> i64 {
                match self {
                    #( #enum_ident::#variants => #enum_ident::#variants as i64, )*
                }
            }
        }

        impl ::rowtrack::FromColumn for #enum_ident {
            const KIND: ::rowtrack::ValueKind = ::rowtrack::ValueKind::Enum;

            fn from_column(value: &::rowtrack::Value) -> ::core::result::Result<Self, ::rowtrack::ColumnError> {
                ::rowtrack::value::enum_from_column(value)
            }
        }

        impl ::rowtrack::ToColumn for #enum_ident {
            fn to_column(&self) -> ::rowtrack::Value {
                ::rowtrack::value::enum_to_column(self)
            }
        }
    })
}
