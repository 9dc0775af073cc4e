use proc_macro::{Delimiter, Group, TokenStream, TokenTree};

/// Runtime settings accepted inside the attribute.
#[derive(Default)]
struct Settings {
    timer_allowance_ms: Option<u64>,
    out_queue_limit: Option<usize>,
}

/// Splits a `TokenStream` into comma-separated arguments.
///
/// Each argument is returned as a `Vec<TokenTree>`.
/// Commas at the top level are used as separators.
fn split_args(input: TokenStream) -> Vec<Vec<TokenTree>> {
    let mut args = Vec::new();
    let mut current = Vec::new();

    for token in input {
        match &token {
            TokenTree::Punct(p) if p.as_char() == ',' => {
                if !current.is_empty() {
                    args.push(current);
                    current = Vec::new();
                }
            }
            _ => current.push(token),
        }
    }

    if !current.is_empty() {
        args.push(current);
    }

    args
}

/// Converts a slice of tokens into a Rust source string.
///
/// Consecutive identifiers are separated by a space to avoid accidental
/// token merging (e.g. `foo bar` vs `foobar`).
fn tokens_to_string(tokens: &[TokenTree]) -> String {
    let mut out = String::new();
    let mut prev_was_ident = false;

    for t in tokens {
        let needs_space = prev_was_ident && matches!(t, TokenTree::Ident(_));
        if needs_space {
            out.push(' ');
        }

        out.push_str(&t.to_string());
        prev_was_ident = matches!(t, TokenTree::Ident(_));
    }

    out
}

/// Parses `key = value` pairs.
fn parse_settings(attr: TokenStream) -> Result<Settings, String> {
    let mut settings = Settings::default();

    for arg in split_args(attr) {
        let text = tokens_to_string(&arg);
        let Some((key, value)) = text.split_once('=') else {
            return Err(format!("expected `key = value`, found `{text}`"));
        };

        let (key, value) = (key.trim(), value.trim());
        match key {
            "timer_allowance_ms" => {
                let ms = value
                    .parse()
                    .map_err(|_| format!("`timer_allowance_ms` expects an integer, found `{value}`"))?;
                settings.timer_allowance_ms = Some(ms);
            }
            "out_queue_limit" => {
                let limit = value
                    .parse()
                    .map_err(|_| format!("`out_queue_limit` expects an integer, found `{value}`"))?;
                settings.out_queue_limit = Some(limit);
            }
            other => return Err(format!("unknown setting `{other}`")),
        }
    }

    Ok(settings)
}

fn compile_error(message: &str) -> TokenStream {
    format!("compile_error!({message:?});")
        .parse()
        .unwrap_or_default()
}

/// Rewrites `fn name(params) -> R { body }` into a function without
/// parameters that builds a runtime, runs `body` with it, then runs the
/// event loop and returns what `body` returned.
pub(crate) fn expand(attr: TokenStream, item: TokenStream, is_test: bool) -> TokenStream {
    let settings = match parse_settings(attr) {
        Ok(settings) => settings,
        Err(message) => return compile_error(&message),
    };

    let mut tokens: Vec<TokenTree> = item.into_iter().collect();

    if tokens
        .iter()
        .any(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "async"))
    {
        return compile_error("spindle tasks are computations, the function must not be `async`");
    }

    let Some(fn_pos) = tokens
        .iter()
        .position(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "fn"))
    else {
        return compile_error("expected a function");
    };

    let Some(params_pos) = tokens
        .iter()
        .skip(fn_pos)
        .position(|t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Parenthesis))
        .map(|offset| fn_pos + offset)
    else {
        return compile_error("expected a parameter list");
    };

    let Some(body_pos) = tokens
        .iter()
        .rposition(|t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Brace))
    else {
        return compile_error("expected a function body");
    };

    let (params, body) = match (&tokens[params_pos], &tokens[body_pos]) {
        (TokenTree::Group(params), TokenTree::Group(body)) => {
            (params.stream().to_string(), body.stream().to_string())
        }
        _ => return compile_error("expected a function"),
    };

    let output = tokens_to_string(&tokens[params_pos + 1..body_pos]);
    let call = if params.trim().is_empty() {
        "__body()"
    } else {
        "__body(&__runtime)"
    };

    let mut builder = String::from("::spindle::RuntimeBuilder::new()");
    if let Some(ms) = settings.timer_allowance_ms {
        builder.push_str(&format!(
            ".timer_allowance(::std::time::Duration::from_millis({ms}))"
        ));
    }
    if let Some(limit) = settings.out_queue_limit {
        builder.push_str(&format!(".out_queue_limit({limit})"));
    }

    let new_block = format!(
        "{{
            let __runtime = {builder}.build().expect(\"failed to build the spindle runtime\");
            let __body = |{params}| {output} {{ {body} }};
            let __out = {call};
            __runtime.run().expect(\"spindle runtime failed\");
            __out
        }}"
    );

    let Ok(new_block) = new_block.parse::<TokenStream>() else {
        return compile_error("failed to expand the function body");
    };

    tokens[params_pos] = TokenTree::Group(Group::new(Delimiter::Parenthesis, TokenStream::new()));
    tokens[body_pos] = TokenTree::Group(Group::new(Delimiter::Brace, new_block));

    let mut result: Vec<TokenTree> = Vec::new();
    if is_test {
        result.extend("#[test]".parse::<TokenStream>().unwrap_or_default());
    }
    result.extend(tokens);

    result.into_iter().collect()
}
