//! A derive macro for the `RemoteExecute` trait.
//!
//! Workers receive operations as opaque bytes tagged with the operation's
//! name. For a worker to execute them, every operation type must be known to
//! the worker binary. This macro registers a type with a
//! [`linkme`](https://docs.rs/linkme) distributed slice, which the linker
//! gathers into a single contiguous section of the binary.
//!
//! # Implementation details
//!
//! Each operation is assigned a stable name, built from the module path of the
//! deriving type and its identifier. A registration pairing that name with a
//! monomorphized execution function is placed in the distributed slice. The
//! execution function handles input assembly, deserialization, execution and
//! re-serialization of the result.
//!
//! Names, rather than counters, are used for lookup so that a coordinator and
//! a worker built as separate binaries agree on how to address an operation.
extern crate proc_macro;

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, Attribute, DeriveInput, Error, Result};

/// Check if the `internal` attribute is present on the derive macro.
///
/// Quoted paths need to be slightly modified if the macro is being called from
/// the `cohort` crate itself.
fn get_is_internal(attrs: &mut Vec<Attribute>) -> Result<bool> {
    let mut is_internal = None;
    let mut errors: Option<Error> = None;

    attrs.retain(|attr| {
        if !attr.path().is_ident("cohort") {
            return true;
        }
        if let Err(err) = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("internal") {
                if is_internal.is_some() {
                    return Err(meta.error("duplicate cohort crate attribute"));
                }

                is_internal = Some(true);
                Ok(())
            } else {
                Err(meta.error("unsupported cohort attribute"))
            }
        }) {
            match &mut errors {
                None => errors = Some(err),
                Some(errors) => errors.combine(err),
            }
        }
        false
    });

    match errors {
        None => Ok(is_internal.unwrap_or(false)),
        Some(errors) => Err(errors),
    }
}

/// See the [module level documentation](crate) for more information.
#[proc_macro_derive(RemoteExecute, attributes(cohort))]
pub fn remote_execute_derive(input: TokenStream) -> TokenStream {
    let mut input = parse_macro_input!(input as DeriveInput);

    let is_internal = match get_is_internal(&mut input.attrs) {
        Ok(path) => path,
        Err(err) => return err.to_compile_error().into(),
    };

    // A registration is a single static. It cannot be instantiated for every
    // possible set of type parameters.
    if !input.generics.params.is_empty() {
        return Error::new(
            input.generics.span(),
            "RemoteExecute cannot be derived for generic types",
        )
        .to_compile_error()
        .into();
    }

    let cohort_path = if is_internal {
        quote! { crate }
    } else {
        quote! { ::cohort }
    };

    // Point `linkme` at the copy re-exported by `cohort`, so that consumers of
    // the derive macro do not need to depend on `linkme` themselves.
    let linkme_path_override = if is_internal {
        quote! {}
    } else {
        quote! {
            #[linkme(crate = #cohort_path::__private::linkme)]
        }
    };

    let name = &input.ident;
    let registration = format_ident!(
        "__COHORT_OPERATION_{}",
        name.to_string().to_uppercase(),
        span = name.span()
    );

    let expanded = quote! {
        impl #cohort_path::operation::RemoteExecute for #name {
            const NAME: &'static str = concat!(module_path!(), "::", stringify!(#name));
        }

        #[#cohort_path::__private::linkme::distributed_slice(#cohort_path::__private::OPERATIONS)]
        #linkme_path_override
        static #registration: #cohort_path::__private::Registration =
            #cohort_path::__private::Registration {
                name: <#name as #cohort_path::operation::RemoteExecute>::NAME,
                execute: #cohort_path::__private::execute::<#name>,
            };
    };

    TokenStream::from(expanded)
}
