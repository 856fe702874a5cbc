//! Placeholder expansion: sequence counters, `${name}` variables, macro
//! parameters, plus the redaction helper used whenever a value is logged.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use sheetpilot_core_types::RowData;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Maximum number of re-expansion passes over a command string.
pub const MAX_SUBSTITUTION_DEPTH: usize = 3;

const SENSITIVE_MARKERS: [&str; 6] = ["password", "token", "secret", "key", "auth", "credential"];
const PREVIEW_CHARS: usize = 100;

static VARIABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([a-zA-Z0-9_]{1,50})\}").unwrap());
static SEQUENCE_OFFSET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{n([+-])(\d+)\}").unwrap());
static MACRO_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(\w+)\}").unwrap());

/// Read-only view over named values.
pub trait VariableLookup {
    fn lookup(&self, name: &str) -> Option<String>;
}

impl VariableLookup for BTreeMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl VariableLookup for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl<T: VariableLookup + ?Sized> VariableLookup for &T {
    fn lookup(&self, name: &str) -> Option<String> {
        (**self).lookup(name)
    }
}

/// Lookup chain used while executing a row: row data, then global variables,
/// then the `n` / `i` counters.
#[derive(Debug, Clone, Copy)]
pub struct ScopedVariables<'a> {
    pub row: &'a RowData,
    pub globals: &'a BTreeMap<String, String>,
    pub sequence: u64,
    pub row_index: u32,
}

impl<'a> ScopedVariables<'a> {
    pub fn new(
        row: &'a RowData,
        globals: &'a BTreeMap<String, String>,
        sequence: u64,
        row_index: u32,
    ) -> Self {
        Self {
            row,
            globals,
            sequence,
            row_index,
        }
    }
}

impl VariableLookup for ScopedVariables<'_> {
    fn lookup(&self, name: &str) -> Option<String> {
        if let Some(value) = self.row.get(name) {
            return Some(value.clone());
        }
        if let Some(value) = self.globals.get(name) {
            return Some(value.clone());
        }
        match name {
            "n" => Some(self.sequence.to_string()),
            "i" => Some(self.row_index.to_string()),
            _ => None,
        }
    }
}

/// Result of a substitution with the bookkeeping needed for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution {
    pub text: String,
    /// Names that were replaced, in first-seen order
    pub replaced: Vec<String>,
    /// Names with no value; their placeholders stay in `text`
    pub unresolved: Vec<String>,
    /// Names whose values carried a nested `${` marker that was stripped
    pub stripped: Vec<String>,
    /// Number of passes that changed the text
    pub passes: usize,
}

/// Replaces `${name}` placeholders, leaving unknown names verbatim.
pub fn substitute(text: &str, vars: &impl VariableLookup) -> String {
    substitute_with_report(text, vars).text
}

pub fn substitute_with_report(text: &str, vars: &impl VariableLookup) -> Substitution {
    let mut report = Substitution {
        text: text.to_string(),
        ..Default::default()
    };

    // One initial pass plus up to MAX_SUBSTITUTION_DEPTH re-expansions.
    for _ in 0..=MAX_SUBSTITUTION_DEPTH {
        let current = report.text.clone();
        let next = VARIABLE_RE.replace_all(&current, |caps: &Captures<'_>| {
            let name = &caps[1];
            match vars.lookup(name) {
                Some(value) => {
                    push_unique(&mut report.replaced, name);
                    if value.contains("${") {
                        warn!(variable = name, "nested placeholder in value, stripping");
                        push_unique(&mut report.stripped, name);
                        value.replace("${", "{")
                    } else {
                        value
                    }
                }
                None => {
                    push_unique(&mut report.unresolved, name);
                    caps[0].to_string()
                }
            }
        });
        if next == current {
            return report;
        }
        report.text = next.into_owned();
        report.passes += 1;
    }

    warn!(passes = report.passes, "variable substitution depth limit reached");
    report
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}

/// Expands `${n}`, `{n}`, `{n+K}`, `{n-K}` (sequence number) and `{i}` (row
/// index). Runs before variable substitution.
pub fn expand_sequence(text: &str, sequence: u64, row_index: u32) -> String {
    if !text.contains('{') {
        return text.to_string();
    }
    let seq = sequence.to_string();
    let expanded = text.replace("${n}", &seq);
    let expanded = SEQUENCE_OFFSET_RE.replace_all(&expanded, |caps: &Captures<'_>| {
        let offset = caps[2].parse::<i64>().unwrap_or(0);
        let base = sequence as i64;
        let value = if &caps[1] == "+" {
            base.saturating_add(offset)
        } else {
            base.saturating_sub(offset)
        };
        value.to_string()
    });
    expanded
        .replace("{n}", &seq)
        .replace("{i}", &row_index.to_string())
}

/// Fills a macro template: `{0}`, `{1}`… take positional arguments, any other
/// `{word}` is looked up in the row data, and unknown placeholders stay.
pub fn substitute_macro_params(template: &str, args: &[String], row: &RowData) -> String {
    MACRO_PARAM_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let key = &caps[1];
            if let Ok(index) = key.parse::<usize>() {
                if let Some(arg) = args.get(index) {
                    return arg.clone();
                }
            }
            match row.get(key) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Log-safe rendering of a variable value. Never use the result for
/// substitution.
pub fn redact(name: &str, value: &str) -> String {
    let lowered = name.to_lowercase();
    let length = value.chars().count();
    if SENSITIVE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return if length > 0 {
            format!("[REDACTED {} chars]", length)
        } else {
            "[EMPTY]".to_string()
        };
    }
    if length > PREVIEW_CHARS {
        let preview: String = value.chars().take(PREVIEW_CHARS).collect();
        return format!("{}... [{} chars total]", preview, length);
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn replaces_known_and_keeps_unknown() {
        let vars = vars(&[("total", "42.50")]);
        let out = substitute_with_report("${total} of ${missing}", &vars);
        assert_eq!(out.text, "42.50 of ${missing}");
        assert_eq!(out.replaced, vec!["total"]);
        assert_eq!(out.unresolved, vec!["missing"]);
    }

    #[test]
    fn substitution_is_idempotent_on_clean_input() {
        let vars = vars(&[("a", "alpha"), ("b", "beta {x}")]);
        for input in ["${a}-${b}", "plain", "${nope} ${a}", "{n} ${b}${b}"] {
            let once = substitute(input, &vars);
            assert_eq!(substitute(&once, &vars), once, "input {:?}", input);
        }
    }

    #[test]
    fn self_reference_terminates() {
        let vars = vars(&[("selfref", "${selfref}"), ("ping", "${pong}"), ("pong", "${ping}")]);
        let out = substitute_with_report("x=${selfref} y=${ping}", &vars);
        assert_eq!(out.text, "x={selfref} y={pong}");
        assert!(out.passes <= MAX_SUBSTITUTION_DEPTH + 1);
        assert_eq!(out.stripped, vec!["selfref", "ping"]);
    }

    #[test]
    fn overlong_names_are_not_placeholders() {
        let name = "v".repeat(51);
        let vars = vars(&[(name.as_str(), "x")]);
        let text = format!("${{{}}}", name);
        assert_eq!(substitute(&text, &vars), text);
    }

    #[test]
    fn scoped_lookup_order() {
        let row: RowData = vars(&[("B", "row-b"), ("shared", "from-row")]);
        let globals = vars(&[("shared", "from-store"), ("token", "abc"), ("n", "shadow")]);
        let scope = ScopedVariables::new(&row, &globals, 7, 12);
        assert_eq!(scope.lookup("shared").as_deref(), Some("from-row"));
        assert_eq!(scope.lookup("token").as_deref(), Some("abc"));
        assert_eq!(scope.lookup("n").as_deref(), Some("shadow"));
        assert_eq!(scope.lookup("i").as_deref(), Some("12"));

        let empty = BTreeMap::new();
        let scope = ScopedVariables::new(&row, &empty, 7, 12);
        assert_eq!(substitute("${B}/${n}", &scope), "row-b/7");
    }

    #[test]
    fn sequence_placeholders() {
        assert_eq!(expand_sequence("id-{n}", 5, 9), "id-5");
        assert_eq!(expand_sequence("id-${n}", 5, 9), "id-5");
        assert_eq!(expand_sequence("{n+10}|{n-7}|{i}", 5, 9), "15|-2|9");
        assert_eq!(expand_sequence("${total}", 5, 9), "${total}");
    }

    #[test]
    fn macro_params_use_args_then_row() {
        let row: RowData = vars(&[("B", "bob"), ("Email", "b@x.io")]);
        let args = vec!["//input[@id='u']".to_string()];
        assert_eq!(
            substitute_macro_params("fill({0}, {B})", &args, &row),
            "fill(//input[@id='u'], bob)"
        );
        assert_eq!(
            substitute_macro_params("fill({1}, {Email}) {var:x} {B,C}", &args, &row),
            "fill({1}, b@x.io) {var:x} {B,C}"
        );
    }

    #[test]
    fn redaction() {
        assert_eq!(redact("api_KEY", "abcdef"), "[REDACTED 6 chars]");
        assert_eq!(redact("authCode", ""), "[EMPTY]");
        assert_eq!(redact("total", "42"), "42");
        let long = "x".repeat(150);
        let shown = redact("note", &long);
        assert!(shown.starts_with(&"x".repeat(100)));
        assert!(shown.ends_with("... [150 chars total]"));
    }
}
