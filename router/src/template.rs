//! `${VAR}` substitution for the proxy config file.
//!
//! Upstream RPC URLs frequently embed provider API keys (`https://mainnet.example/v3/${KEY}`).
//! Rendering the raw YAML against the environment before parsing keeps those keys out of the
//! checked-in config.

/// Render `input` by replacing placeholders with values provided by `lookup`.
///
/// Supported placeholder syntax:
/// - `${NAME}` where `NAME` matches `[A-Za-z_][A-Za-z0-9_]*`; unset is an error.
/// - `${NAME:-fallback}` which renders `fallback` when `NAME` is unset or empty.
///
/// A lone `$` not followed by `{` is copied through unchanged.
pub fn render_env_template_with(
    input: &str,
    mut lookup: impl FnMut(&str) -> Option<String>,
) -> anyhow::Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find("${") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let Some(end) = after.find('}') else {
            anyhow::bail!("unterminated placeholder");
        };
        let inner = &after[..end];

        let (name, fallback) = match inner.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (inner, None),
        };
        validate_env_name(name)?;

        match (lookup(name).filter(|v| !v.is_empty()), fallback) {
            (Some(value), _) => out.push_str(&value),
            (None, Some(fallback)) => out.push_str(fallback),
            (None, None) => anyhow::bail!("missing environment variable: {name}"),
        }

        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Render `input` against the process environment.
pub fn render_env_template(input: &str) -> anyhow::Result<String> {
    render_env_template_with(input, |name| std::env::var(name).ok())
}

fn validate_env_name(name: &str) -> anyhow::Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        anyhow::bail!("empty placeholder name");
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        anyhow::bail!("invalid placeholder name: {name}");
    }
    if chars.any(|ch| !(ch.is_ascii_alphanumeric() || ch == '_')) {
        anyhow::bail!("invalid placeholder name: {name}");
    }
    Ok(())
}
