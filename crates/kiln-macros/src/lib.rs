//! Procedural macros for the kiln hot-reload runtime.
//!
//! Provides `#[kiln::entry]`, which turns an ordinary function into the
//! exported entry point the host resolves after loading a module.

use proc_macro::TokenStream;
use quote::quote;
use syn::{FnArg, ItemFn, parse_macro_input};

/// Marks a function as the module's entry point.
///
/// The function must take exactly one `&kiln::Context` argument and return
/// `()`. The macro keeps the function as written and adds an exported
/// `extern "C" fn kiln_entry` that wraps the context pointer and calls it,
/// catching panics so they never unwind into the host.
///
/// # Example
///
/// ```rust,ignore
/// use kiln::prelude::*;
///
/// #[kiln::entry]
/// fn main(ctx: &Context) {
///     kiln::log!(ctx, "hello from a freshly compiled module");
/// }
/// ```
#[proc_macro_attribute]
pub fn entry(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        let attr = proc_macro2::TokenStream::from(attr);
        return syn::Error::new_spanned(attr, "#[kiln::entry] takes no arguments")
            .to_compile_error()
            .into();
    }

    let input = parse_macro_input!(item as ItemFn);

    if let Err(err) = check_signature(&input) {
        return err.to_compile_error().into();
    }

    let name = &input.sig.ident;

    let expanded = quote! {
        #input

        #[doc(hidden)]
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn kiln_entry(ctx: *mut ::kiln::ffi::RawContext) {
            unsafe { ::kiln::__private::run_entry(ctx, #name) }
        }
    };

    TokenStream::from(expanded)
}

fn check_signature(input: &ItemFn) -> syn::Result<()> {
    let sig = &input.sig;

    if sig.asyncness.is_some() {
        return Err(syn::Error::new_spanned(
            sig.asyncness,
            "the entry function cannot be async",
        ));
    }

    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "the entry function cannot be generic",
        ));
    }

    if sig.inputs.len() != 1 || matches!(sig.inputs.first(), Some(FnArg::Receiver(_))) {
        return Err(syn::Error::new_spanned(
            &sig.inputs,
            "the entry function takes exactly one `&kiln::Context` argument",
        ));
    }

    if let syn::ReturnType::Type(_, ty) = &sig.output {
        return Err(syn::Error::new_spanned(
            ty,
            "the entry function must not return a value",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> ItemFn {
        syn::parse_str(src).expect("valid item")
    }

    #[test]
    fn test_accepts_context_fn() {
        assert!(check_signature(&parse("fn main(ctx: &kiln::Context) {}")).is_ok());
    }

    #[test]
    fn test_rejects_return_value() {
        assert!(check_signature(&parse("fn main(ctx: &kiln::Context) -> i32 { 0 }")).is_err());
    }

    #[test]
    fn test_rejects_wrong_arity() {
        assert!(check_signature(&parse("fn main() {}")).is_err());
        assert!(check_signature(&parse("fn main(a: &kiln::Context, b: u8) {}")).is_err());
    }

    #[test]
    fn test_rejects_async() {
        assert!(check_signature(&parse("async fn main(ctx: &kiln::Context) {}")).is_err());
    }
}
