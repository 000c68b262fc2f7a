//! Translation feature flags and the `MOONC_INTERNAL_PARAMS` parameter
//! string.
//!
//! The parameter string has the shape `k=v,k=v|k=v`: a `|` splits it into a
//! pre group and a post group, each a comma-separated list of `k=v` pairs.
//! Unknown keys are fatal; this is internal plumbing, a typo must not pass
//! silently.

/// Flags consulted during lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Print location sub-trees in the S-expression form.
    pub show_loc: bool,
    /// Emit `Levent` location wrappers around lowered bodies.
    pub debug: bool,
    /// Strings are host (JS) builtin strings rather than GC arrays.
    pub use_js_builtin_string: bool,
    /// Emit textual wasm without name compression.
    pub plain_wat: bool,
    /// Deduplicate identical function bodies at emission.
    pub dedup_wasm: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            show_loc: false,
            debug: false,
            use_js_builtin_string: false,
            plain_wat: false,
            dedup_wasm: false,
        }
    }
}

pub const INTERNAL_PARAMS_VAR: &str = "MOONC_INTERNAL_PARAMS";

/// The two halves of the parameter string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalParams {
    pub pre: Vec<(String, String)>,
    pub post: Vec<(String, String)>,
}

fn parse_group(group: &str, out: &mut Vec<(String, String)>) {
    if group.is_empty() {
        return;
    }
    for pair in group.split(',') {
        let Some((k, v)) = pair.split_once('=') else {
            panic!("{INTERNAL_PARAMS_VAR}: missing `=` in `{pair}`");
        };
        out.push((k.to_string(), v.to_string()));
    }
}

/// Parse the raw parameter string. Aborts on malformed input, naming the
/// missing separator and the offending substring.
pub fn parse_internal_params(raw: &str) -> InternalParams {
    let mut params = InternalParams::default();
    match raw.split_once('|') {
        Some((pre, post)) => {
            parse_group(pre, &mut params.pre);
            parse_group(post, &mut params.post);
        }
        None => {
            // A single group is accepted as the pre group.
            parse_group(raw, &mut params.pre);
        }
    }
    params
}

fn flag_value(key: &str, value: &str) -> bool {
    match value {
        "0" => false,
        "1" => true,
        _ => panic!("{INTERNAL_PARAMS_VAR}: value for `{key}` must be 0 or 1, got `{value}`"),
    }
}

impl Config {
    /// Apply a parsed parameter string on top of the current flags.
    pub fn apply_internal_params(&mut self, params: &InternalParams) {
        for (k, v) in params.pre.iter().chain(params.post.iter()) {
            match k.as_str() {
                "plain_wat" => self.plain_wat = flag_value(k, v),
                "dedup_wasm" => self.dedup_wasm = flag_value(k, v),
                _ => panic!("{INTERNAL_PARAMS_VAR}: unknown key `{k}`"),
            }
        }
    }

    /// Read `MOONC_INTERNAL_PARAMS` from the environment, if set.
    pub fn from_env() -> Config {
        let mut config = Config::default();
        if let Ok(raw) = std::env::var(INTERNAL_PARAMS_VAR) {
            let params = parse_internal_params(&raw);
            config.apply_internal_params(&params);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pre_and_post_groups() {
        let p = parse_internal_params("plain_wat=1,dedup_wasm=0|dedup_wasm=1");
        assert_eq!(p.pre.len(), 2);
        assert_eq!(p.post.len(), 1);

        let mut config = Config::default();
        config.apply_internal_params(&p);
        assert!(config.plain_wat);
        // Post group wins, applied after pre.
        assert!(config.dedup_wasm);
    }

    #[test]
    fn single_group_is_pre() {
        let p = parse_internal_params("plain_wat=1");
        assert_eq!(p.pre, vec![("plain_wat".to_string(), "1".to_string())]);
        assert!(p.post.is_empty());
    }

    #[test]
    fn empty_string_is_empty() {
        assert_eq!(parse_internal_params(""), InternalParams::default());
    }

    #[test]
    #[should_panic(expected = "missing `=` in `plain_wat`")]
    fn missing_equals_is_fatal() {
        parse_internal_params("plain_wat");
    }

    #[test]
    #[should_panic(expected = "unknown key `wat_plain`")]
    fn unknown_key_is_fatal() {
        let p = parse_internal_params("wat_plain=1");
        Config::default().apply_internal_params(&p);
    }

    #[test]
    #[should_panic(expected = "must be 0 or 1")]
    fn non_boolean_value_is_fatal() {
        let p = parse_internal_params("plain_wat=yes");
        Config::default().apply_internal_params(&p);
    }
}
