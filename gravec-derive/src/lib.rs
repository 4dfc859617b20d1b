//! # Gravec Derive Macros
//!
//! This crate provides the procedural macro for `gravec`. It automates the
//! implementation of the `GraphClass` and `FieldCodec` traits: the class
//! template is generated from the struct's fields, registered on first
//! use, and the struct converts to and from dynamic value graphs.
//!
//! Compatible with `syn 2.0`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, LitInt, LitStr};

/// Derives `GraphClass` and `FieldCodec`.
///
/// Supported attributes:
/// * `#[graph(class = "name")]` — the stream class name; defaults to the
///   struct's identifier.
/// * `#[graph(fingerprint = 0x...)]` — pins the structural fingerprint
///   instead of computing it at registration.
#[proc_macro_derive(GraphClass, attributes(graph))]
pub fn derive_graph_class(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;

    let (class_name, fingerprint) = match parse_attributes(&input.attrs, &name) {
        Ok(res) => res,
        Err(e) => return e.to_compile_error().into(),
    };

    let data_struct = match input.data {
        Data::Struct(ds) => ds,
        _ => {
            return syn::Error::new(name.span(), "GraphClass only supports structs")
                .to_compile_error()
                .into();
        }
    };
    let fields = match data_struct.fields {
        Fields::Named(named) => named.named.into_iter().collect::<Vec<_>>(),
        Fields::Unit => Vec::new(),
        Fields::Unnamed(_) => {
            return syn::Error::new(name.span(), "GraphClass requires named fields")
                .to_compile_error()
                .into();
        }
    };

    let spec_fields = fields.iter().map(|f| {
        let ident = f.ident.as_ref().expect("named field");
        let fname = ident.to_string();
        let ty = &f.ty;
        quote! {
            spec = spec.field_raw(
                #fname,
                <#ty as ::gravec::internal::FieldCodec>::field_tag(),
                <#ty as ::gravec::internal::FieldCodec>::type_signature().as_deref(),
            );
        }
    });

    let set_fields = fields.iter().map(|f| {
        let ident = f.ident.as_ref().expect("named field");
        let fname = ident.to_string();
        quote! {
            inst.set(
                #fname,
                ::gravec::internal::FieldCodec::into_value(&self.#ident)?,
            )?;
        }
    });

    let get_fields = fields.iter().map(|f| {
        let ident = f.ident.as_ref().expect("named field");
        let fname = ident.to_string();
        let ty = &f.ty;
        quote! {
            #ident: <#ty as ::gravec::internal::FieldCodec>::from_value(&inst.get(#fname)?)?,
        }
    });

    let pin_fingerprint = fingerprint.map(|fp| {
        quote! { spec = spec.fingerprint(#fp); }
    });

    let expanded = quote! {
        impl ::gravec::internal::GraphClass for #name {
            fn class_name() -> &'static str {
                #class_name
            }

            fn class_spec() -> ::gravec::internal::ClassSpec {
                #[allow(unused_mut)]
                let mut spec = ::gravec::internal::ClassSpec::new(#class_name);
                #(#spec_fields)*
                #pin_fingerprint
                spec
            }

            fn to_value(&self) -> ::gravec::internal::Result<::gravec::internal::Value> {
                let class = ::gravec::internal::runtime_class::<Self>()?;
                let mut inst = class.new_instance();
                #(#set_fields)*
                ::core::result::Result::Ok(::gravec::internal::Value::object(inst))
            }

            fn from_value(
                value: &::gravec::internal::Value,
            ) -> ::gravec::internal::Result<Self> {
                let _class = ::gravec::internal::runtime_class::<Self>()?;
                let obj = ::gravec::internal::instance_of(
                    value,
                    <Self as ::gravec::internal::GraphClass>::class_name(),
                )?;
                let inst = obj.borrow();
                ::core::result::Result::Ok(Self {
                    #(#get_fields)*
                })
            }
        }

        impl ::gravec::internal::FieldCodec for #name {
            fn field_tag() -> ::gravec::internal::FieldTag {
                ::gravec::internal::FieldTag::Object
            }

            fn type_signature() -> ::core::option::Option<::std::string::String> {
                ::core::option::Option::Some(::std::format!(
                    "L{};",
                    <Self as ::gravec::internal::GraphClass>::class_name()
                ))
            }

            fn into_value(&self) -> ::gravec::internal::Result<::gravec::internal::Value> {
                <Self as ::gravec::internal::GraphClass>::to_value(self)
            }

            fn from_value(
                value: &::gravec::internal::Value,
            ) -> ::gravec::internal::Result<Self> {
                <Self as ::gravec::internal::GraphClass>::from_value(value)
            }
        }
    };

    TokenStream::from(expanded)
}

/// Parses struct-level attributes. Returns (class_name, fingerprint).
fn parse_attributes(
    attrs: &[Attribute],
    name: &syn::Ident,
) -> syn::Result<(String, Option<u64>)> {
    let mut class_name = name.to_string();
    let mut fingerprint = None;

    for attr in attrs {
        if attr.path().is_ident("graph") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("class") {
                    let value = meta.value()?;
                    let s: LitStr = value.parse()?;
                    class_name = s.value();
                    return Ok(());
                }

                if meta.path.is_ident("fingerprint") {
                    let value = meta.value()?;
                    let lit: LitInt = value.parse()?;
                    fingerprint = Some(lit.base10_parse::<u64>()?);
                    return Ok(());
                }

                Err(meta.error("Unknown graph attribute key. Supported: class, fingerprint"))
            })?;
        }
    }
    Ok((class_name, fingerprint))
}
