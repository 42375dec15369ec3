use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemFn, parse_macro_input};

/// Test attribute that installs the crate's tracing subscriber first.
///
/// Sync functions become plain `#[test]`s; async functions become
/// `#[tokio::test]` and forward any arguments, so paused-clock tests read:
///
/// ```ignore
/// #[artemis_verify::test(start_paused = true)]
/// async fn converges_early() { ... }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args_ts = proc_macro2::TokenStream::from(attr);
    let input = parse_macro_input!(item as ItemFn);
    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let name = &input.sig.ident;

    let paren_args = if args_ts.is_empty() {
        quote! {}
    } else {
        quote! { ( #args_ts ) }
    };

    let output = if sig.asyncness.is_some() {
        quote! {
            #[tokio::test #paren_args]
            #(#attrs)*
            #vis #sig {
                artemis_verify::trace::with_test_tracing(stringify!(#name), || async move #block).await
            }
        }
    } else {
        quote! {
            #[test]
            #(#attrs)*
            #vis #sig {
                artemis_verify::trace::with_test_tracing_sync(stringify!(#name), || #block)
            }
        }
    };
    output.into()
}
