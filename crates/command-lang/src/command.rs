//! Typed command records produced by the parser

use serde::{Deserialize, Serialize};
use sheetpilot_core_types::{parse_column_range, ColumnRangeError};
use std::fmt;
use std::str::FromStr;

/// One parsed unit of the command language.
///
/// Commands are re-parsed from their source string on every execution since
/// substitution runs before parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum Command {
    /// Blank, oversized or otherwise inert cell
    Empty,

    /// `disable: ...`
    Disabled,

    /// `pause` / `tạm dừng`
    Pause,

    /// `config(on_error:skip, retry:2)`
    Config(ConfigDirective),

    /// `click(xpath|xpath2)`
    Click { xpath: String },

    /// `delay(ms)`
    Delay { milliseconds: u64 },

    /// `wait(seconds[, log])` or `wait(min-max[, log])`
    Wait {
        duration: WaitDuration,
        log: Option<String>,
    },

    /// `waitfor(xpath[, timeout][, visible])`
    #[serde(rename = "waitfor")]
    WaitFor {
        xpath: String,
        /// Seconds; `None` or zero falls back to the configured default
        timeout_secs: Option<u64>,
        must_be_visible: bool,
    },

    /// `waiturl(pattern[, timeout][, regex])`
    #[serde(rename = "waiturl")]
    WaitUrl {
        pattern: String,
        timeout_secs: Option<u64>,
        use_regex: bool,
    },

    /// `url(target, prelink, {columns})`
    Url {
        target: String,
        prelink: String,
        columns: ColumnSpec,
    },

    /// `checklogin(loggedInXpath, loginUrl, {loginCols}, targetUrl)`
    #[serde(rename = "checklogin")]
    CheckLogin {
        logged_in_xpath: String,
        login_url: String,
        login_columns: ColumnSpec,
        target_url: String,
    },

    /// `if(xpath, {columns})` with optional `else {columns}`
    If {
        xpath: String,
        columns: ColumnSpec,
        else_columns: Option<ColumnSpec>,
    },

    /// `if(xpath, source, operator, target, {columns})`
    IfAdvanced {
        xpath: String,
        source: Option<String>,
        operator: CompareOp,
        target: Option<String>,
        columns: ColumnSpec,
    },

    /// `xpathIfTruthy ?? xpathIfFalsy`
    Conditional { when_true: String, when_false: String },

    /// `macro:name(arg0, arg1)`
    Macro { name: String, args: Vec<String> },

    /// `extract(xpath, {var:name})`
    Extract { xpath: String, var_name: String },

    /// `fill(xpath, value)` or a bare target filled with the cell value
    Fill { xpath: String, value: Option<String> },
}

impl Command {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Empty => "empty",
            Command::Disabled => "disabled",
            Command::Pause => "pause",
            Command::Config(_) => "config",
            Command::Click { .. } => "click",
            Command::Delay { .. } => "delay",
            Command::Wait { .. } => "wait",
            Command::WaitFor { .. } => "waitfor",
            Command::WaitUrl { .. } => "waiturl",
            Command::Url { .. } => "url",
            Command::CheckLogin { .. } => "checklogin",
            Command::If { .. } => "if",
            Command::IfAdvanced { .. } => "if_advanced",
            Command::Conditional { .. } => "conditional",
            Command::Macro { .. } => "macro",
            Command::Extract { .. } => "extract",
            Command::Fill { .. } => "fill",
        }
    }

    /// Commands that run outside the retry wrapper.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Command::Empty | Command::Disabled | Command::Pause | Command::Config(_)
        )
    }

    /// Commands that re-enter the row loop over a column range or macro body.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Command::Url { .. }
                | Command::CheckLogin { .. }
                | Command::If { .. }
                | Command::IfAdvanced { .. }
                | Command::Macro { .. }
        )
    }
}

/// Run-scoped strategy applied when a command exhausts its retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Abort the whole run
    #[default]
    Stop,

    /// Continue with the next command
    Skip,

    /// Suspend until an external resume signal
    Pause,
}

impl ErrorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorPolicy::Stop => "stop",
            ErrorPolicy::Skip => "skip",
            ErrorPolicy::Pause => "pause",
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop" => Ok(ErrorPolicy::Stop),
            "skip" => Ok(ErrorPolicy::Skip),
            "pause" => Ok(ErrorPolicy::Pause),
            other => Err(format!("unknown error policy '{}'", other)),
        }
    }
}

/// Parameters of a `config(...)` directive. Absent keys leave the run's
/// current setting untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDirective {
    pub on_error: Option<ErrorPolicy>,
    pub retry_count: Option<u32>,
}

/// Longest `wait`, `waitfor` or `waiturl` a cell may ask for
pub const MAX_WAIT_SECS: u64 = 86_400;

/// Duration argument of `wait(...)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitDuration {
    /// Fixed number of seconds
    Fixed(f64),

    /// Uniformly sampled between `min` and `max` seconds
    Range { min: f64, max: f64 },

    /// Unparseable argument, kept for the error message
    Invalid(String),
}

impl WaitDuration {
    pub fn parse(raw: &str) -> Self {
        let in_bounds = |secs: f64| secs.is_finite() && (0.0..=MAX_WAIT_SECS as f64).contains(&secs);
        let raw = raw.trim();
        let parsed = match raw.split_once('-') {
            Some((min, max)) => match (min.trim().parse::<f64>(), max.trim().parse::<f64>()) {
                (Ok(min), Ok(max)) if in_bounds(min) && in_bounds(max) && max >= min => {
                    Some(WaitDuration::Range { min, max })
                }
                _ => None,
            },
            None => match raw.parse::<f64>() {
                Ok(secs) if in_bounds(secs) => Some(WaitDuration::Fixed(secs)),
                _ => None,
            },
        };
        parsed.unwrap_or_else(|| WaitDuration::Invalid(raw.to_string()))
    }
}

/// Comparison operator of the extended `if`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    Contains,
    Regex,
    Exists,
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "==" => Ok(CompareOp::Eq),
            "!=" => Ok(CompareOp::Ne),
            "contains" => Ok(CompareOp::Contains),
            "regex" => Ok(CompareOp::Regex),
            "exists" => Ok(CompareOp::Exists),
            other => Err(format!("unknown operator '{}'", other)),
        }
    }
}

/// Raw `{B,D-F}` column group. Expansion is deferred to the point of use so a
/// malformed range surfaces as a configuration error there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnSpec(pub String);

impl ColumnSpec {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn columns(&self) -> Result<Vec<String>, ColumnRangeError> {
        parse_column_range(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_duration_variants() {
        assert_eq!(WaitDuration::parse("2.5"), WaitDuration::Fixed(2.5));
        assert_eq!(
            WaitDuration::parse(" 1 - 3 "),
            WaitDuration::Range { min: 1.0, max: 3.0 }
        );
        assert_eq!(
            WaitDuration::parse("3-1"),
            WaitDuration::Invalid("3-1".into())
        );
        assert_eq!(WaitDuration::parse("abc"), WaitDuration::Invalid("abc".into()));
    }

    #[test]
    fn wait_duration_rejects_unbounded_values() {
        for raw in ["1e30", "1-inf", "inf", "NaN", "0-1e10", "86401"] {
            assert_eq!(
                WaitDuration::parse(raw),
                WaitDuration::Invalid(raw.into()),
                "{}",
                raw
            );
        }
        assert_eq!(
            WaitDuration::parse("86400"),
            WaitDuration::Fixed(MAX_WAIT_SECS as f64)
        );
    }

    #[test]
    fn error_policy_from_str() {
        assert_eq!("SKIP".parse::<ErrorPolicy>(), Ok(ErrorPolicy::Skip));
        assert!("retry".parse::<ErrorPolicy>().is_err());
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::Stop);
    }

    #[test]
    fn command_serializes_with_type_tag() {
        let json = serde_json::to_value(Command::Delay { milliseconds: 500 }).unwrap();
        assert_eq!(json["type"], "delay");
        assert_eq!(json["params"]["milliseconds"], 500);
        let json = serde_json::to_value(Command::WaitFor {
            xpath: "//a".into(),
            timeout_secs: None,
            must_be_visible: true,
        })
        .unwrap();
        assert_eq!(json["type"], "waitfor");
    }
}
