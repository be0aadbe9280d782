use proc_macro2::{Span, TokenStream};
use quote::{ToTokens, quote};
use syn::{Attribute, ItemFn};

pub(crate) fn parse_string(lit: syn::Lit, span: Span, field: &str) -> Result<String, syn::Error> {
    match lit {
        syn::Lit::Str(s) => Ok(s.value()),
        syn::Lit::Verbatim(s) => Ok(s.to_string()),
        _ => Err(syn::Error::new(
            span,
            format!("Failed to parse value of `{field}` as string."),
        )),
    }
}

pub(crate) fn parse_int(lit: syn::Lit, span: Span, field: &str) -> Result<usize, syn::Error> {
    let syn::Lit::Int(lit) = lit else {
        return Err(syn::Error::new(
            span,
            format!("Failed to parse value of `{field}` as integer."),
        ));
    };

    lit.base10_parse::<usize>().map_err(|e| {
        syn::Error::new(
            span,
            format!("Failed to parse value of `{field}` as integer: {e}"),
        )
    })
}

/// Matches `#[test]`, `#[core::prelude::*::test]` and `#[std::prelude::*::test]`.
pub(crate) fn is_test_attribute(attr: &Attribute) -> bool {
    let syn::Meta::Path(path) = &attr.meta else {
        return false;
    };

    if path.segments.iter().any(|s| !s.arguments.is_none()) {
        return false;
    }

    let idents: Vec<String> = path.segments.iter().map(|s| s.ident.to_string()).collect();

    match idents.as_slice() {
        [test] => path.leading_colon.is_none() && test == "test",
        [root, prelude, _, test] => {
            (root == "core" || root == "std") && prelude == "prelude" && test == "test"
        }
        _ => false,
    }
}

pub(crate) fn token_stream_with_error(mut tokens: TokenStream, error: syn::Error) -> TokenStream {
    tokens.extend(error.into_compile_error());
    tokens
}

/// Spans of the first and last token of the function's final statement, so
/// type mismatches on the generated return point at user code.
pub(crate) fn last_stmt_spans(input: &ItemFn) -> (Span, Span) {
    let tokens = input
        .block
        .stmts
        .last()
        .map(ToTokens::to_token_stream)
        .unwrap_or_default();

    let mut iter = tokens.into_iter();
    let start = iter.next().map_or_else(Span::call_site, |t| t.span());
    let end = iter.last().map_or(start, |t| t.span());
    (start, end)
}

/// Re-emits `input` with `generated_attrs` appended to its attributes and its
/// body replaced by `body` followed by `last_block`.
pub(crate) fn into_tokens(
    input: ItemFn,
    generated_attrs: TokenStream,
    body: TokenStream,
    last_block: TokenStream,
) -> TokenStream {
    let ItemFn {
        attrs, vis, sig, ..
    } = input;

    // Inner attributes are not supported on the blocks we expand into, lift
    // them outside of the function.
    let attrs = attrs.into_iter().map(|mut attr| {
        attr.style = syn::AttrStyle::Outer;
        attr
    });

    quote! {
        #(#attrs)*
        #generated_attrs
        #vis #sig {
            #body
            #last_block
        }
    }
}
