//! Command parser
//!
//! `parse` is total: anything it cannot make sense of becomes [`Command::Empty`]
//! or the bare-fill fallback, so a malformed cell never aborts a batch.

use crate::command::{ColumnSpec, Command, CompareOp, ConfigDirective, WaitDuration};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Inputs longer than this (in characters) parse as [`Command::Empty`].
pub const MAX_COMMAND_LENGTH: usize = 5000;

const PAUSE_KEYWORDS: [&str; 2] = ["pause", "tạm dừng"];

static CONFIG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^config\((.+)\)$").unwrap());
static DISABLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^disable\s*:").unwrap());
static CLICK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^click\((.+)\)$").unwrap());
static DELAY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^delay\((\d+)\)$").unwrap());
static WAIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^wait\(([^,]+)(?:,\s*(.+))?\)$").unwrap());
static WAITFOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^waitfor\(([^,]+)(?:,\s*(\d+))?(?:,\s*(.+))?\)$").unwrap()
});
static WAITURL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^waiturl\(([^,]+)(?:,\s*(\d+))?(?:,\s*(.+))?\)$").unwrap()
});
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^url\(([^,]+),\s*([^,]+),\s*(\{[^}]+\})\)$").unwrap());
static BRACE_GROUP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^}]*\}").unwrap());
static IF_ADVANCED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)^if\(([^,]+),\s*(?:"([^"]*)"|([^,]+)),\s*(==|!=|contains|regex|exists),\s*(?:"([^"]*)"|([^,]+))?,\s*(\{[^}]+\})\)$"#,
    )
    .unwrap()
});
static IF_ELSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^if\(([^,]+),\s*(\{[^}]+\})\s+else\s+(\{[^}]+\})\)$").unwrap()
});
static IF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^if\(([^,]+),\s*(\{[^}]+\})\)$").unwrap());
static MACRO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^macro:([a-z_]+)(?:\((.*)\))?$").unwrap());
static EXTRACT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^extract\((.+),\s*\{var:([a-zA-Z0-9_]+)\}\)$").unwrap()
});
static FILL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^fill\((.+)\)$").unwrap());

/// Parses one command string.
pub fn parse(input: &str) -> Command {
    let cmd = input.trim();
    if cmd.is_empty() {
        return Command::Empty;
    }

    let length = cmd.chars().count();
    if length > MAX_COMMAND_LENGTH {
        warn!(length, "command exceeds {} chars, ignoring", MAX_COMMAND_LENGTH);
        return Command::Empty;
    }

    if let Some(caps) = CONFIG_RE.captures(cmd) {
        return Command::Config(parse_config(&caps[1]));
    }

    if DISABLE_RE.is_match(cmd) {
        return Command::Disabled;
    }

    let lowered = cmd.to_lowercase();
    if PAUSE_KEYWORDS.contains(&lowered.as_str()) {
        return Command::Pause;
    }

    if let Some(caps) = CLICK_RE.captures(cmd) {
        return Command::Click {
            xpath: caps[1].trim().to_string(),
        };
    }

    if let Some(caps) = DELAY_RE.captures(cmd) {
        if let Ok(milliseconds) = caps[1].parse::<u64>() {
            return Command::Delay { milliseconds };
        }
    }

    if let Some(caps) = WAIT_RE.captures(cmd) {
        return Command::Wait {
            duration: WaitDuration::parse(&caps[1]),
            log: caps.get(2).map(|m| m.as_str().trim().to_string()),
        };
    }

    if let Some(caps) = WAITFOR_RE.captures(cmd) {
        return Command::WaitFor {
            xpath: caps[1].trim().to_string(),
            timeout_secs: caps.get(2).and_then(|m| m.as_str().parse().ok()),
            must_be_visible: caps
                .get(3)
                .map(|m| m.as_str().trim().eq_ignore_ascii_case("visible"))
                .unwrap_or(false),
        };
    }

    if let Some(caps) = WAITURL_RE.captures(cmd) {
        return Command::WaitUrl {
            pattern: caps[1].trim().to_string(),
            timeout_secs: caps.get(2).and_then(|m| m.as_str().parse().ok()),
            use_regex: caps
                .get(3)
                .map(|m| m.as_str().trim().eq_ignore_ascii_case("regex"))
                .unwrap_or(false),
        };
    }

    if let Some(caps) = URL_RE.captures(cmd) {
        return Command::Url {
            target: caps[1].trim().to_string(),
            prelink: caps[2].trim().to_string(),
            columns: ColumnSpec::new(caps[3].trim()),
        };
    }

    if let Some(command) = parse_checklogin(cmd) {
        return command;
    }

    if let Some(caps) = IF_ADVANCED_RE.captures(cmd) {
        if let Ok(operator) = caps[4].parse::<CompareOp>() {
            return Command::IfAdvanced {
                xpath: caps[1].trim().to_string(),
                source: caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str().to_string()),
                operator,
                target: caps.get(5).or_else(|| caps.get(6)).map(|m| m.as_str().to_string()),
                columns: ColumnSpec::new(&caps[7]),
            };
        }
    }

    if let Some(caps) = IF_ELSE_RE.captures(cmd) {
        return Command::If {
            xpath: caps[1].trim().to_string(),
            columns: ColumnSpec::new(caps[2].trim()),
            else_columns: Some(ColumnSpec::new(caps[3].trim())),
        };
    }

    if let Some(caps) = IF_RE.captures(cmd) {
        return Command::If {
            xpath: caps[1].trim().to_string(),
            columns: ColumnSpec::new(caps[2].trim()),
            else_columns: None,
        };
    }

    if cmd.contains("??") {
        let mut parts = cmd.split("??").map(str::trim);
        return Command::Conditional {
            when_true: parts.next().unwrap_or_default().to_string(),
            when_false: parts.next().unwrap_or_default().to_string(),
        };
    }

    if let Some(caps) = MACRO_RE.captures(cmd) {
        let args = caps
            .get(2)
            .map(|m| m.as_str().trim())
            .filter(|raw| !raw.is_empty())
            .map(|raw| raw.split(',').map(|a| a.trim().to_string()).collect())
            .unwrap_or_default();
        return Command::Macro {
            name: caps[1].trim().to_string(),
            args,
        };
    }

    if let Some(caps) = EXTRACT_RE.captures(cmd) {
        return Command::Extract {
            xpath: caps[1].trim().to_string(),
            var_name: caps[2].trim().to_string(),
        };
    }

    if let Some(caps) = FILL_RE.captures(cmd) {
        let inner = &caps[1];
        return match inner.rfind(',') {
            Some(comma) if comma > 0 => Command::Fill {
                xpath: inner[..comma].trim().to_string(),
                value: Some(inner[comma + 1..].trim().to_string()),
            },
            _ => Command::Fill {
                xpath: inner.trim().to_string(),
                value: None,
            },
        };
    }

    Command::Fill {
        xpath: cmd.to_string(),
        value: None,
    }
}

fn parse_config(body: &str) -> ConfigDirective {
    let mut directive = ConfigDirective::default();
    for part in body.split(',') {
        let mut kv = part.splitn(2, ':').map(|s| s.trim().to_lowercase());
        let key = kv.next().unwrap_or_default();
        let value = kv.next().unwrap_or_default();
        match key.as_str() {
            "on_error" | "error" => match value.parse() {
                Ok(policy) => directive.on_error = Some(policy),
                Err(err) => warn!("config(): {}", err),
            },
            "retry" => directive.retry_count = Some(value.parse().unwrap_or(1)),
            _ => {}
        }
    }
    directive
}

/// `checklogin(xpath, loginUrl, {cols}, targetUrl)`.
///
/// The brace group is located first; the text before it is split on its last
/// comma so the login-check xpath may itself contain commas.
fn parse_checklogin(cmd: &str) -> Option<Command> {
    const PREFIX: &str = "checklogin(";
    if cmd.len() < PREFIX.len() + 1
        || !cmd.is_char_boundary(PREFIX.len())
        || !cmd[..PREFIX.len()].eq_ignore_ascii_case(PREFIX)
        || !cmd.ends_with(')')
    {
        return None;
    }
    let inner = &cmd[PREFIX.len()..cmd.len() - 1];
    let group = BRACE_GROUP_RE.find(inner)?;

    let mut pre = inner[..group.start()].trim();
    let mut post = inner[group.end()..].trim();
    if let Some(stripped) = pre.strip_suffix(',') {
        pre = stripped.trim();
    }
    if let Some(stripped) = post.strip_prefix(',') {
        post = stripped.trim();
    }

    let comma = pre.rfind(',')?;
    if comma == 0 {
        return None;
    }
    Some(Command::CheckLogin {
        logged_in_xpath: pre[..comma].trim().to_string(),
        login_url: pre[comma + 1..].trim().to_string(),
        login_columns: ColumnSpec::new(group.as_str()),
        target_url: post.to_string(),
    })
}
