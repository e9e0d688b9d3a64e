//! `#[bounded]` turns a sync or async function into a test that fails
//! instead of hanging once its wall-clock budget runs out.
//!
//! ```ignore
//! #[test_timeout::bounded(20)]
//! async fn talks_to_a_child_process() { /* ... */ }
//! ```
//!
//! The budget defaults to 60 seconds and is multiplied by
//! `TEST_TIMEOUT_SCALE` (a positive float) when that variable is set.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_BUDGET_SECS: u64 = 60;

#[proc_macro_attribute]
pub fn bounded(attr: TokenStream, item: TokenStream) -> TokenStream {
    let budget_secs = if attr.is_empty() {
        DEFAULT_BUDGET_SECS
    } else {
        let lit = parse_macro_input!(attr as LitInt);
        match lit.base10_parse::<u64>() {
            Ok(0) => {
                return syn::Error::new_spanned(lit, "test budget must be greater than zero")
                    .to_compile_error()
                    .into()
            }
            Ok(secs) => secs,
            Err(err) => return err.to_compile_error().into(),
        }
    };

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if !sig.inputs.is_empty() {
        return syn::Error::new_spanned(&sig.inputs, "bounded tests take no arguments")
            .to_compile_error()
            .into();
    }

    let attrs: Vec<Attribute> = attrs.into_iter().filter(|a| !is_test_marker(a)).collect();
    let thread_name = sig.ident.to_string();

    let body: TokenStream2 = if sig.asyncness.take().is_some() {
        quote! {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async move {
                if tokio::time::timeout(budget, async move #block).await.is_err() {
                    panic!("test exceeded its {:?} budget", budget);
                }
            });
        }
    } else {
        quote! { #block }
    };

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let scale = std::env::var("TEST_TIMEOUT_SCALE")
                .ok()
                .and_then(|raw| raw.parse::<f64>().ok())
                .filter(|scale| *scale > 0.0)
                .unwrap_or(1.0);
            let budget = std::time::Duration::from_secs_f64(#budget_secs as f64 * scale);
            let (sender, receiver) = std::sync::mpsc::channel();
            let worker = std::thread::Builder::new()
                .name(String::from(#thread_name))
                .spawn(move || {
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        #body
                    }));
                    let _ = sender.send(outcome);
                })
                .expect("failed to spawn test thread");
            match receiver.recv_timeout(budget) {
                Ok(Ok(())) => {
                    let _ = worker.join();
                }
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded its {:?} budget", budget)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited without reporting a result")
                }
            }
        }
    })
}

/// `#[test]` and `#[tokio::test]` are implied by `#[bounded]`.
fn is_test_marker(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    match (segments.next(), segments.next(), segments.next()) {
        (Some(only), None, None) => only.ident == "test",
        (Some(first), Some(second), None) => first.ident == "tokio" && second.ident == "test",
        _ => false,
    }
}
