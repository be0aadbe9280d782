//! Expansion of `#[covent::main]` and `#[covent::test]`.
use proc_macro2::{Span, TokenStream};
use quote::{quote, quote_spanned};
use syn::ItemFn;
use syn::parse::Parser;

use crate::parse::*;

// syn::AttributeArgs does not implement syn::Parse
type AttributeArgs = syn::punctuated::Punctuated<syn::Meta, syn::Token![,]>;

/// Config used in case of the attribute not being able to build a valid config
const DEFAULT_ERROR_CONFIG: FinalConfig = FinalConfig {
    reactor: ReactorFlavor::Uring,
    entries: None,
    cq_size_multiplier: None,
};

const ATTRIBUTES: &str = "`reactor`, `entries`, `cq_size_multiplier`";

/// For quickstart on how this works, let's analyze this example:
///
/// ```rust,no_run
/// #[covent::main(entries = 64)]
/// async fn main() {
///     println!("Hello world");
/// }
/// ```
///
/// The compiler splits the tokens where args is everything between the
/// proc_macro parentheses:
/// - `entries = 64`
///
/// And item is the function whose body becomes the root task:
/// ```no_compile
/// async fn main() {
///     println!("Hello world");
/// }
/// ```
pub(crate) fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    // If any of the steps for this macro fail, we still want to expand to an item that is as close
    // to the expected output as possible. This helps out IDEs such that completions and other
    // related features keep working.
    let input: ItemFn = match syn::parse2(item.clone()) {
        Ok(it) => it,
        Err(e) => return token_stream_with_error(item, e),
    };

    let config = if input.sig.ident == "main" && !input.sig.inputs.is_empty() {
        let msg = "the main function cannot accept arguments";
        Err(syn::Error::new_spanned(&input.sig.ident, msg))
    } else {
        AttributeArgs::parse_terminated
            .parse2(args)
            .and_then(|args| build_config(&input, args, false))
    };

    match config {
        Ok(config) => parse_knobs(input, false, config),
        Err(e) => token_stream_with_error(parse_knobs(input, false, DEFAULT_ERROR_CONFIG), e),
    }
}

pub(crate) fn test(args: TokenStream, item: TokenStream) -> TokenStream {
    let input: ItemFn = match syn::parse2(item.clone()) {
        Ok(it) => it,
        Err(e) => return token_stream_with_error(item, e),
    };

    let config = if let Some(attr) = input.attrs.iter().find(|attr| is_test_attribute(attr)) {
        let msg = "second test attribute is supplied, consider removing or changing the order of your test attributes";
        Err(syn::Error::new_spanned(attr, msg))
    } else {
        AttributeArgs::parse_terminated
            .parse2(args)
            .and_then(|args| build_config(&input, args, true))
    };

    match config {
        Ok(config) => parse_knobs(input, true, config),
        Err(e) => token_stream_with_error(parse_knobs(input, true, DEFAULT_ERROR_CONFIG), e),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum ReactorFlavor {
    Uring,
    Timer,
}

impl ReactorFlavor {
    fn from_str(s: &str) -> Result<ReactorFlavor, String> {
        match s {
            "uring" => Ok(ReactorFlavor::Uring),
            "timer" => Ok(ReactorFlavor::Timer),
            _ => Err(format!(
                "No such reactor `{s}`. The reactors are `uring` and `timer`."
            )),
        }
    }
}

struct FinalConfig {
    reactor: ReactorFlavor,
    entries: Option<usize>,
    cq_size_multiplier: Option<usize>,
}

struct ConfigBuilder {
    reactor: Option<ReactorFlavor>,
    entries: Option<(usize, Span)>,
    cq_size_multiplier: Option<(usize, Span)>,
    is_test: bool,
}

impl ConfigBuilder {
    fn new(is_test: bool) -> Self {
        ConfigBuilder {
            reactor: None,
            entries: None,
            cq_size_multiplier: None,
            is_test,
        }
    }

    fn macro_name(&self) -> &'static str {
        if self.is_test {
            "covent::test"
        } else {
            "covent::main"
        }
    }

    fn set_reactor(&mut self, reactor: syn::Lit, span: Span) -> Result<(), syn::Error> {
        if self.reactor.is_some() {
            return Err(syn::Error::new(span, "`reactor` set multiple times."));
        }

        let reactor_str = parse_string(reactor, span, "reactor")?;
        let reactor =
            ReactorFlavor::from_str(&reactor_str).map_err(|err| syn::Error::new(span, err))?;
        self.reactor = Some(reactor);

        Ok(())
    }

    fn set_entries(&mut self, entries: syn::Lit, span: Span) -> Result<(), syn::Error> {
        if self.entries.is_some() {
            return Err(syn::Error::new(span, "`entries` set multiple times."));
        }

        let entries = parse_int(entries, span, "entries")?;
        if !entries.is_power_of_two() {
            return Err(syn::Error::new(span, "`entries` must be a power of two."));
        }
        self.entries = Some((entries, span));

        Ok(())
    }

    fn set_cq_size_multiplier(&mut self, multiplier: syn::Lit, span: Span) -> Result<(), syn::Error> {
        if self.cq_size_multiplier.is_some() {
            return Err(syn::Error::new(
                span,
                "`cq_size_multiplier` set multiple times.",
            ));
        }

        let multiplier = parse_int(multiplier, span, "cq_size_multiplier")?;
        if multiplier == 0 {
            return Err(syn::Error::new(span, "`cq_size_multiplier` may not be 0."));
        }
        self.cq_size_multiplier = Some((multiplier, span));

        Ok(())
    }

    fn build(&self) -> Result<FinalConfig, syn::Error> {
        let reactor = self.reactor.unwrap_or(ReactorFlavor::Uring);

        if reactor == ReactorFlavor::Timer {
            if let Some((_, span)) = self.entries.or(self.cq_size_multiplier) {
                let msg = format!(
                    "Ring options require the `uring` reactor. Use `#[{}(reactor = \"uring\")]`",
                    self.macro_name(),
                );
                return Err(syn::Error::new(span, msg));
            }
        }

        Ok(FinalConfig {
            reactor,
            entries: self.entries.map(|(v, _)| v),
            cq_size_multiplier: self.cq_size_multiplier.map(|(v, _)| v),
        })
    }
}

fn build_config(
    input: &ItemFn,
    args: AttributeArgs,
    is_test: bool,
) -> Result<FinalConfig, syn::Error> {
    if input.sig.asyncness.is_none() {
        let msg = "the `async` keyword is missing from the function declaration";
        return Err(syn::Error::new_spanned(input.sig.fn_token, msg));
    }

    let mut config = ConfigBuilder::new(is_test);

    for arg in args {
        match arg {
            syn::Meta::NameValue(namevalue) => {
                let ident = namevalue
                    .path
                    .get_ident()
                    .ok_or_else(|| {
                        syn::Error::new_spanned(&namevalue, "Must have specified ident")
                    })?
                    .to_string()
                    .to_lowercase();
                let lit = match &namevalue.value {
                    syn::Expr::Lit(syn::ExprLit { lit, .. }) => lit,
                    expr => return Err(syn::Error::new_spanned(expr, "Must be a literal")),
                };
                let span = syn::spanned::Spanned::span(lit);
                match ident.as_str() {
                    "reactor" => config.set_reactor(lit.clone(), span)?,
                    "entries" => config.set_entries(lit.clone(), span)?,
                    "cq_size_multiplier" => config.set_cq_size_multiplier(lit.clone(), span)?,
                    name => {
                        let msg = format!(
                            "Unknown attribute {name} is specified; expected one of: {ATTRIBUTES}",
                        );
                        return Err(syn::Error::new_spanned(namevalue, msg));
                    }
                }
            }
            syn::Meta::Path(path) => {
                let name = path
                    .get_ident()
                    .ok_or_else(|| syn::Error::new_spanned(&path, "Must have specified ident"))?
                    .to_string()
                    .to_lowercase();
                let msg = match name.as_str() {
                    "reactor" | "entries" | "cq_size_multiplier" => {
                        format!("The `{name}` attribute requires an argument.")
                    }
                    name => {
                        format!("Unknown attribute {name} is specified; expected one of: {ATTRIBUTES}.")
                    }
                };
                return Err(syn::Error::new_spanned(path, msg));
            }
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "Unknown attribute inside the macro",
                ));
            }
        }
    }

    config.build()
}

fn parse_knobs(mut input: ItemFn, is_test: bool, config: FinalConfig) -> TokenStream {
    input.sig.asyncness = None;

    // If type mismatch occurs, the current rustc points to the last statement.
    let (last_stmt_start_span, last_stmt_end_span) = last_stmt_spans(&input);

    let reactor = match config.reactor {
        ReactorFlavor::Uring => {
            let mut builder = quote_spanned! {last_stmt_start_span=>
                covent::runtime::Builder::new()
            };

            if let Some(v) = config.entries {
                let v = v as u32;
                builder = quote_spanned! {last_stmt_start_span=> #builder.entries(#v) };
            }

            if let Some(v) = config.cq_size_multiplier {
                let v = v as u32;
                builder = quote_spanned! {last_stmt_start_span=> #builder.cq_size_multiplier(#v) };
            }

            quote_spanned! {last_stmt_start_span=>
                #builder.try_build().expect("Failed building the reactor")
            }
        }
        ReactorFlavor::Timer => quote_spanned! {last_stmt_start_span=>
            covent::reactor::TimerReactor::new()
        },
    };

    let generated_attrs = if is_test {
        quote! {
            #[::core::prelude::v1::test]
        }
    } else {
        quote! {}
    };

    let body_ident = quote! { body };
    // This explicit `return` is intentional. See tokio-rs/tokio#4636
    let last_block = quote_spanned! {last_stmt_end_span=>
        #[allow(clippy::expect_used, clippy::diverging_sub_expression, clippy::needless_return, clippy::unwrap_in_result)]
        {
            return covent::Runner::new(#reactor)
                .block_on(covent::__private::entry(#body_ident))
                .expect("Failed driving the root task to completion");
        }
    };

    let body = &input.block;

    // The root task owns its body, so it must be `'static`: arguments are
    // moved in. Test bodies are boxed to `dyn Future` to reduce the number of
    // `Runner::block_on` copies generated during compilation.
    let body = if is_test {
        let output_type = match &input.sig.output {
            // For functions with no return value syn doesn't print anything,
            // but that doesn't work as `Output` for our boxed `Future`, so
            // default to `()` (the same type as the function output).
            syn::ReturnType::Default => quote! { () },
            syn::ReturnType::Type(_, ret_type) => quote! { #ret_type },
        };
        quote! {
            let body: ::std::pin::Pin<::std::boxed::Box<dyn ::core::future::Future<Output = #output_type>>> =
                ::std::boxed::Box::pin(async move #body);
        }
    } else {
        quote! {
            let body = async move #body;
        }
    };

    into_tokens(input, generated_attrs, body, last_block)
}
