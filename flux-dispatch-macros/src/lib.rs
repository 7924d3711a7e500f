//! Procedural macros for flux-dispatch

use darling::{FromDeriveInput, FromVariant};
use proc_macro::TokenStream;
use quote::{format_ident, quote};
use std::collections::HashSet;
use syn::{parse_macro_input, DeriveInput};

/// Container-level attributes for #[derive(Action)]
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(action), supports(enum_any))]
struct ActionOpts {
    ident: syn::Ident,
    vis: syn::Visibility,
    generics: syn::Generics,
    data: darling::ast::Data<ActionVariant, ()>,

    /// Name of the generated kind enum (defaults to `<Enum>Kind`)
    #[darling(default)]
    kind_name: Option<String>,
}

/// Variant-level attributes
#[derive(Debug, FromVariant)]
#[darling(attributes(action))]
struct ActionVariant {
    ident: syn::Ident,

    /// Kind name reported by `ActionKind::name` (defaults to the variant name)
    #[darling(default)]
    rename: Option<String>,
}

impl ActionVariant {
    fn kind_str(&self) -> String {
        self.rename
            .clone()
            .unwrap_or_else(|| self.ident.to_string())
    }
}

/// Derive macro for the Action trait
///
/// Generates a fieldless `<Enum>Kind` enum with one variant per action
/// variant, implements `ActionKind` for it and `Action` for the enum.
/// Handlers are registered per kind.
///
/// # Attributes
///
/// - `#[action(kind_name = "PlayerEvent")]` on the enum: name of the kind enum
/// - `#[action(rename = "track.loaded")]` on a variant: its kind name string
///
/// # Example
/// ```ignore
/// #[derive(Action, Clone, Debug)]
/// enum PlayerAction {
///     Play { track: String },
///     #[action(rename = "TrackLoaded")]
///     Loaded(u32),
///     Stop,
/// }
///
/// let action = PlayerAction::Loaded(7);
/// assert_eq!(action.kind(), PlayerActionKind::Loaded);
/// assert_eq!(action.name(), "TrackLoaded");
/// assert_eq!(PlayerActionKind::all().len(), 3);
/// ```
#[proc_macro_derive(Action, attributes(action))]
pub fn derive_action(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let opts = match ActionOpts::from_derive_input(&input) {
        Ok(opts) => opts,
        Err(e) => return e.write_errors().into(),
    };

    let name = &opts.ident;
    let vis = &opts.vis;

    let variants = match &opts.data {
        darling::ast::Data::Enum(variants) => variants,
        _ => {
            return syn::Error::new_spanned(&input, "Action can only be derived for enums")
                .to_compile_error()
                .into();
        }
    };

    if variants.is_empty() {
        return syn::Error::new_spanned(&input.ident, "Action requires at least one variant")
            .to_compile_error()
            .into();
    }

    let mut seen = HashSet::new();
    for v in variants {
        let kind_str = v.kind_str();
        if !seen.insert(kind_str.clone()) {
            return syn::Error::new_spanned(
                &v.ident,
                format!("duplicate action kind name `{}`", kind_str),
            )
            .to_compile_error()
            .into();
        }
    }

    let kind_ident = match &opts.kind_name {
        Some(kind_name) => match syn::parse_str::<syn::Ident>(kind_name) {
            Ok(ident) => ident,
            Err(_) => {
                return syn::Error::new_spanned(
                    &input.ident,
                    format!("`{}` is not a valid kind_name", kind_name),
                )
                .to_compile_error()
                .into();
            }
        },
        None => format_ident!("{}Kind", name),
    };

    let kind_variants: Vec<_> = variants.iter().map(|v| &v.ident).collect();
    let kind_doc = format!("Kind tag for [`{}`] variants", name);

    let name_arms = variants.iter().map(|v| {
        let variant = &v.ident;
        let kind_str = v.kind_str();
        quote! { #kind_ident::#variant => #kind_str }
    });

    // Brace patterns with `..` match unit, tuple and struct variants alike
    let kind_arms = variants.iter().map(|v| {
        let variant = &v.ident;
        quote! { #name::#variant { .. } => #kind_ident::#variant }
    });

    let (impl_generics, ty_generics, where_clause) = opts.generics.split_for_impl();

    let expanded = quote! {
        #[doc = #kind_doc]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #vis enum #kind_ident {
            #(#kind_variants),*
        }

        impl #kind_ident {
            /// Every kind, in declaration order
            pub fn all() -> &'static [#kind_ident] {
                &[#(#kind_ident::#kind_variants),*]
            }
        }

        impl flux_dispatch::ActionKind for #kind_ident {
            fn name(&self) -> &'static str {
                match self {
                    #(#name_arms),*
                }
            }
        }

        impl #impl_generics flux_dispatch::Action for #name #ty_generics #where_clause {
            type Kind = #kind_ident;

            fn kind(&self) -> #kind_ident {
                match self {
                    #(#kind_arms),*
                }
            }
        }
    };

    TokenStream::from(expanded)
}
