//! Procedural macros for the Trellis binding engine.
//!
//! This crate provides the `#[derive(Bindable)]` macro, which describes the
//! bindable members of a struct to the member provider.
//!
//! # Attributes
//!
//! ## `#[bind]`
//!
//! Configures a field as a bindable property:
//!
//! ```ignore
//! #[derive(Bindable)]
//! struct Person {
//!     // `Property<T>` fields are bound by default as "FirstName"
//!     first_name: Property<String>,
//!
//!     #[bind(name = "Age", read_only)]
//!     age: Property<u32>,
//!
//!     // Plain fields need an explicit #[bind] and are read-only
//!     #[bind(notify = "id_changed")]
//!     id: u64,
//!
//!     #[bind(skip)]
//!     cache: Property<Vec<u8>>,
//!
//!     #[event]
//!     id_changed: Signal<()>,
//! }
//! ```
//!
//! Bind attributes:
//! - `name = "Name"`: The member name used in paths (defaults to the field name in PascalCase)
//! - `read_only`: Drops the setter
//! - `notify = "signal_field"`: Observes changes through a `Signal` field
//! - `skip`: Excludes the field
//! - `event`: Same as `#[event]`
//!
//! ## `#[event]`
//!
//! Exposes a `Signal` field as an event member. Accepts `name = "..."`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Expr, ExprLit, Field, Fields, Ident, Lit, Type, parse_macro_input};

/// Derive the `Bindable` trait.
///
/// This macro generates:
/// - An implementation of `trellis_core::Bindable` listing one member per bound field
/// - A `BINDING_MEMBER_NAMES` constant with the generated member names
/// - A `register_bindable` function registering the type with a provider
///
/// # Example
///
/// ```ignore
/// use trellis::prelude::*;
///
/// #[derive(Bindable)]
/// struct Label {
///     text: Property<String>,
///
///     #[event]
///     clicked: Signal<()>,
/// }
///
/// let services = BindingServices::new();
/// Label::register_bindable(services.member_provider());
/// ```
#[proc_macro_derive(Bindable, attributes(bind, event))]
pub fn derive_bindable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_derive_bindable(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Parsed information about one bound field.
struct MemberInfo {
    field_name: Ident,
    member_name: String,
    kind: MemberFieldKind,
    notify_signal: Option<Ident>,
    read_only: bool,
}

enum MemberFieldKind {
    /// A `Property<T>` field.
    Property,
    /// Any other field, read by cloning.
    Plain(Type),
    /// A `Signal<Args>` field marked `#[event]`.
    Event,
}

fn impl_derive_bindable(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Bindable derive only supports structs with named fields",
                ));
            }
        },
        _ => return Err(syn::Error::new_spanned(input, "Bindable derive only supports structs")),
    };

    let mut members = Vec::new();
    for field in fields.iter() {
        if let Some(info) = parse_member_field(field)? {
            if members.iter().any(|m: &MemberInfo| m.member_name == info.member_name) {
                return Err(syn::Error::new_spanned(
                    field,
                    format!("duplicate bindable member name `{}`", info.member_name),
                ));
            }
            members.push(info);
        }
    }

    let descriptors = members.iter().map(generate_member);
    let names = members.iter().map(|m| m.member_name.as_str());

    let expanded = quote! {
        impl #impl_generics trellis_core::Bindable for #struct_name #ty_generics #where_clause {
            fn binding_members() -> ::std::vec::Vec<trellis_core::BindingMember> {
                ::std::vec![#(#descriptors),*]
            }
        }

        impl #impl_generics #struct_name #ty_generics #where_clause {
            /// Names of the members generated by `#[derive(Bindable)]`.
            pub const BINDING_MEMBER_NAMES: &'static [&'static str] = &[#(#names),*];

            /// Register the bindable members of this type with `provider`.
            pub fn register_bindable(provider: &trellis_core::MemberProvider) {
                provider.register_type::<Self>();
            }
        }
    };

    Ok(expanded)
}

fn generate_member(info: &MemberInfo) -> TokenStream2 {
    let field = &info.field_name;
    let name = &info.member_name;

    let base = match &info.kind {
        MemberFieldKind::Property => quote! {
            trellis_core::BindingMember::from_property(#name, |source: &Self| &source.#field)
        },
        MemberFieldKind::Plain(ty) => quote! {
            trellis_core::BindingMember::property::<Self, #ty, _>(
                #name,
                |source: &Self| ::std::clone::Clone::clone(&source.#field),
            )
        },
        MemberFieldKind::Event => quote! {
            trellis_core::BindingMember::event(#name, |source: &Self| &source.#field)
        },
    };

    let notify = info.notify_signal.as_ref().map(|signal| {
        quote! { .with_notify(|source: &Self| &source.#signal) }
    });
    let read_only = info.read_only.then(|| quote! { .read_only() });

    quote! { #base #notify #read_only }
}

/// Parse a field into a member, or `None` when it is not bound.
fn parse_member_field(field: &Field) -> syn::Result<Option<MemberInfo>> {
    let field_name = match &field.ident {
        Some(name) => name.clone(),
        None => return Ok(None),
    };

    let mut bind = parse_bind_attrs(&field.attrs)?;
    let mut event = parse_event_attrs(&field.attrs)?;
    if bind.event {
        event = Some(bind.name.take());
        bind.present = bind.notify.is_some() || bind.read_only;
    }

    if let Some(event_name) = event {
        if bind.present {
            return Err(syn::Error::new_spanned(
                field,
                "a field cannot be both #[bind] and #[event]",
            ));
        }
        if !is_wrapper(&field.ty, "Signal") {
            return Err(syn::Error::new_spanned(&field.ty, "#[event] requires a `Signal<Args>` field"));
        }
        return Ok(Some(MemberInfo {
            member_name: event_name.unwrap_or_else(|| pascal_case(&field_name)),
            field_name,
            kind: MemberFieldKind::Event,
            notify_signal: None,
            read_only: false,
        }));
    }

    if bind.skip {
        return Ok(None);
    }

    let kind = if is_wrapper(&field.ty, "Property") {
        MemberFieldKind::Property
    } else if bind.present {
        MemberFieldKind::Plain(field.ty.clone())
    } else {
        return Ok(None);
    };

    if !bind.present && field_name.to_string().starts_with('_') {
        return Ok(None);
    }

    let read_only = bind.read_only || matches!(kind, MemberFieldKind::Plain(_));
    Ok(Some(MemberInfo {
        member_name: bind.name.unwrap_or_else(|| pascal_case(&field_name)),
        field_name,
        kind,
        notify_signal: bind.notify.map(|signal| format_ident!("{}", signal)),
        read_only,
    }))
}

#[derive(Default)]
struct BindAttrs {
    present: bool,
    name: Option<String>,
    notify: Option<String>,
    read_only: bool,
    skip: bool,
    event: bool,
}

/// Parse the `#[bind(...)]` attributes of a field.
fn parse_bind_attrs(attrs: &[Attribute]) -> syn::Result<BindAttrs> {
    let mut result = BindAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("bind") {
            continue;
        }
        result.present = true;

        // A bare #[bind] has no nested meta
        if matches!(attr.meta, syn::Meta::Path(_)) {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                result.name = Some(parse_string(&meta)?);
            } else if meta.path.is_ident("notify") {
                result.notify = Some(parse_string(&meta)?);
            } else if meta.path.is_ident("read_only") {
                result.read_only = true;
            } else if meta.path.is_ident("skip") {
                result.skip = true;
            } else if meta.path.is_ident("event") {
                result.event = true;
            } else {
                return Err(meta.error("unsupported bind attribute"));
            }
            Ok(())
        })?;
    }

    Ok(result)
}

/// Parse the `#[event(...)]` attributes of a field.
///
/// Returns `Some(name)` when the field is an event, with the explicit name if given.
fn parse_event_attrs(attrs: &[Attribute]) -> syn::Result<Option<Option<String>>> {
    let mut result = None;

    for attr in attrs {
        if !attr.path().is_ident("event") {
            continue;
        }
        let mut name = None;
        if !matches!(attr.meta, syn::Meta::Path(_)) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    name = Some(parse_string(&meta)?);
                    Ok(())
                } else {
                    Err(meta.error("unsupported event attribute"))
                }
            })?;
        }
        result = Some(name);
    }

    Ok(result)
}

fn parse_string(meta: &syn::meta::ParseNestedMeta<'_>) -> syn::Result<String> {
    let value: Expr = meta.value()?.parse()?;
    match value {
        Expr::Lit(ExprLit {
            lit: Lit::Str(lit_str), ..
        }) => Ok(lit_str.value()),
        other => Err(syn::Error::new_spanned(other, "expected a string literal")),
    }
}

/// Whether `ty` is `Wrapper<...>` (by last path segment).
fn is_wrapper(ty: &Type, wrapper: &str) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == wrapper
                && matches!(segment.arguments, syn::PathArguments::AngleBracketed(_));
        }
    }
    false
}

/// `first_name` -> `FirstName`.
fn pascal_case(ident: &Ident) -> String {
    let raw = ident.to_string();
    let raw = raw.strip_prefix("r#").unwrap_or(&raw);
    raw.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
