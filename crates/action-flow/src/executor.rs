//! Command interpreter implementation

use crate::errors::FlowError;
use crate::host::HostLink;
use crate::macros::MacroResolver;
use crate::strategies::{DefaultFailureHandler, FailureDecision, FailureHandler};
use crate::types::*;
use action_primitives::{
    cancellable_sleep, element_exists, wait_for_element, wait_for_url, with_deadline, ActionError,
    DomActions, ExecCtx, Selector,
};
use async_recursion::async_recursion;
use command_lang::{
    expand_sequence, parse, redact, substitute, substitute_macro_params, substitute_with_report,
    ColumnSpec, Command, CompareOp, ConfigDirective, ErrorPolicy, ScopedVariables, WaitDuration,
    MAX_WAIT_SECS,
};
use rand::Rng;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Values of a `??` cell that select the first target
const TRUTHY: [&str; 4] = ["true", "yes", "có", "1"];

/// Seconds of a parsed `wait`, zero when not representable
fn wait_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// Executes command strings against a page
pub struct CommandInterpreter {
    dom: Arc<dyn DomActions>,
    host: Arc<dyn HostLink>,
    macros: Arc<dyn MacroResolver>,
    failure_handler: Arc<dyn FailureHandler>,
    timing: InterpreterTiming,
}

impl CommandInterpreter {
    /// Create an interpreter with default timings
    pub fn new(
        dom: Arc<dyn DomActions>,
        host: Arc<dyn HostLink>,
        macros: Arc<dyn MacroResolver>,
    ) -> Self {
        let timing = InterpreterTiming::default();
        Self {
            dom,
            host,
            macros,
            failure_handler: Arc::new(DefaultFailureHandler::new(timing.retry_backoff)),
            timing,
        }
    }

    /// Replace timings. Also resets the failure handler to a fixed backoff of
    /// `timing.retry_backoff`.
    pub fn with_timing(mut self, timing: InterpreterTiming) -> Self {
        self.failure_handler = Arc::new(DefaultFailureHandler::new(timing.retry_backoff));
        self.timing = timing;
        self
    }

    pub fn with_failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = handler;
        self
    }

    pub fn timing(&self) -> &InterpreterTiming {
        &self.timing
    }

    /// Execute one command string
    ///
    /// Placeholders are expanded and the result parsed on every call. A failed
    /// command is retried `retry_count` times and then settled by the run's
    /// error policy; only a `stop` decision or cancellation surfaces as `Err`.
    #[async_recursion]
    pub async fn process_command(
        &self,
        raw: &str,
        ctx: &ExecContext,
    ) -> Result<CommandOutcome, FlowError> {
        let source = raw.trim();
        if source.is_empty() {
            return Ok(CommandOutcome::Completed);
        }
        if ctx.is_cancelled() {
            return Err(FlowError::Cancelled);
        }

        let prepared = self.prepare(source, ctx).await;
        let command = parse(&prepared);
        debug!(
            row_index = ctx.row_index,
            depth = ctx.depth,
            kind = command.kind(),
            "Processing command"
        );

        match &command {
            Command::Empty | Command::Disabled => return Ok(CommandOutcome::Completed),
            Command::Config(directive) => {
                self.apply_config(directive, ctx).await;
                return Ok(CommandOutcome::Completed);
            }
            Command::Pause => {
                info!(row_index = ctx.row_index, "Pause command reached");
                self.host.wait_for_resume(ctx.token, ctx.row_index).await?;
                return Ok(CommandOutcome::Completed);
            }
            _ => {}
        }

        let mut attempt = 1;
        let error = loop {
            if ctx.is_cancelled() {
                return Err(FlowError::Cancelled);
            }
            let retry_count = ctx.policy().retry_count;
            match self.execute_once(&command, ctx).await {
                Ok(()) => return Ok(CommandOutcome::Completed),
                Err(e) if e.is_stop() => return Err(e),
                Err(e) => {
                    warn!(
                        "Command {} failed (attempt {}/{}): {}",
                        command.kind(),
                        attempt,
                        retry_count + 1,
                        e
                    );
                    if !self.failure_handler.should_retry(&e, attempt, retry_count) {
                        break e;
                    }
                    self.sleep(ctx, self.failure_handler.calculate_backoff(attempt))
                        .await?;
                    attempt += 1;
                }
            }
        };

        let decision = self
            .failure_handler
            .decide(&prepared, &error, ctx.policy().on_error);
        self.host
            .report_command_error(ctx.token, &prepared, &decision.report_line(), ctx.row_index)
            .await;

        match decision {
            FailureDecision::SkipMissing => Ok(CommandOutcome::Skipped {
                reason: error.to_string(),
            }),
            FailureDecision::Skip(reason) => Ok(CommandOutcome::Skipped { reason }),
            FailureDecision::Pause(reason) => {
                self.host.wait_for_resume(ctx.token, ctx.row_index).await?;
                Ok(CommandOutcome::Resumed { reason })
            }
            FailureDecision::Stop(reason) => Err(FlowError::Aborted(reason)),
        }
    }

    /// Expand sequence placeholders, then variables if any are referenced
    async fn prepare(&self, source: &str, ctx: &ExecContext) -> String {
        let expanded = expand_sequence(source, ctx.sequence_number, ctx.row_index);
        if !expanded.contains("${") {
            return expanded;
        }
        let globals = self.fetch_variables().await;
        let scope = ScopedVariables::new(
            &ctx.row_data,
            &globals,
            ctx.sequence_number,
            ctx.row_index,
        );
        let report = substitute_with_report(&expanded, &scope);
        if !report.unresolved.is_empty() {
            debug!(unresolved = ?report.unresolved, "Placeholders left verbatim");
        }
        report.text
    }

    async fn fetch_variables(&self) -> BTreeMap<String, String> {
        match self.host.variables().await {
            Ok(vars) => vars,
            Err(e) => {
                warn!("Variables unavailable, substituting row data only: {}", e);
                BTreeMap::new()
            }
        }
    }

    async fn apply_config(&self, directive: &ConfigDirective, ctx: &ExecContext) {
        let updated = {
            let mut policy = ctx.policy.lock();
            if policy.apply(directive) {
                Some(*policy)
            } else {
                None
            }
        };
        if let Some(policy) = updated {
            info!(
                on_error = %policy.on_error,
                retry_count = policy.retry_count,
                "Run policy updated"
            );
            self.host.update_policy(ctx.token, policy).await;
        }
    }

    /// Budget of one attempt. Composite commands get `composite_timeout` as an
    /// outer cap; their sub-commands still carry their own budgets inside it.
    fn attempt_budget(&self, command: &Command) -> Duration {
        let base = self.timing.command_timeout;
        let slack = Duration::from_secs(1);
        let own = match command {
            _ if command.is_composite() => return self.timing.composite_timeout,
            Command::Delay { milliseconds } => Duration::from_millis(*milliseconds),
            Command::Wait { duration, .. } => match duration {
                WaitDuration::Fixed(secs) => wait_secs(*secs),
                WaitDuration::Range { max, .. } => wait_secs(*max),
                WaitDuration::Invalid(_) => Duration::ZERO,
            },
            Command::WaitFor { timeout_secs, .. } => {
                self.wait_timeout(*timeout_secs, self.timing.wait_for_timeout)
            }
            Command::WaitUrl { timeout_secs, .. } => {
                self.wait_timeout(*timeout_secs, self.timing.wait_url_timeout)
            }
            _ => return base,
        };
        base.max(own.saturating_add(slack))
    }

    /// Explicit timeouts are clamped to `MAX_WAIT_SECS`
    fn wait_timeout(&self, secs: Option<u64>, default: Duration) -> Duration {
        secs.filter(|s| *s > 0)
            .map(|s| Duration::from_secs(s.min(MAX_WAIT_SECS)))
            .unwrap_or(default)
    }

    async fn execute_once(&self, command: &Command, ctx: &ExecContext) -> Result<(), FlowError> {
        let exec = ExecCtx::new(self.attempt_budget(command), ctx.cancel.clone());
        with_deadline(&exec, command.kind(), self.dispatch(command, ctx)).await
    }

    async fn dispatch(&self, command: &Command, ctx: &ExecContext) -> Result<(), FlowError> {
        match command {
            Command::Empty | Command::Disabled | Command::Pause | Command::Config(_) => Ok(()),
            Command::Click { xpath } => self.click(xpath, ctx).await,
            Command::Delay { milliseconds } => {
                if ctx.opted_out() {
                    debug!("Delay skipped by cell value");
                    return Ok(());
                }
                self.sleep(ctx, Duration::from_millis(*milliseconds)).await
            }
            Command::Wait { duration, log } => self.wait(duration, log.as_deref(), ctx).await,
            Command::WaitFor {
                xpath,
                timeout_secs,
                must_be_visible,
            } => {
                self.wait_for(xpath, *timeout_secs, *must_be_visible, ctx)
                    .await
            }
            Command::WaitUrl {
                pattern,
                timeout_secs,
                use_regex,
            } => self.wait_url(pattern, *timeout_secs, *use_regex, ctx).await,
            Command::Url {
                target,
                prelink,
                columns,
            } => self.url(target, prelink, columns, ctx).await,
            Command::CheckLogin {
                logged_in_xpath,
                login_url,
                login_columns,
                target_url,
            } => {
                self.check_login(logged_in_xpath, login_url, login_columns, target_url, ctx)
                    .await
            }
            Command::If {
                xpath,
                columns,
                else_columns,
            } => self.if_exists(xpath, columns, else_columns.as_ref(), ctx).await,
            Command::IfAdvanced {
                xpath,
                source,
                operator,
                target,
                columns,
            } => {
                self.if_compare(
                    xpath,
                    source.as_deref(),
                    *operator,
                    target.as_deref(),
                    columns,
                    ctx,
                )
                .await
            }
            Command::Conditional {
                when_true,
                when_false,
            } => self.conditional(when_true, when_false, ctx).await,
            Command::Macro { name, args } => self.run_macro(name, args, ctx).await,
            Command::Extract { xpath, var_name } => self.extract(xpath, var_name, ctx).await,
            Command::Fill { xpath, value } => self.fill(xpath, value.as_deref(), ctx).await,
        }
    }

    async fn sleep(&self, ctx: &ExecContext, duration: Duration) -> Result<(), FlowError> {
        Ok(cancellable_sleep(&ctx.cancel, duration).await?)
    }

    /// Click the first resolvable `|`-separated alternative
    async fn click(&self, xpaths: &str, ctx: &ExecContext) -> Result<(), FlowError> {
        if ctx.opted_out() {
            debug!("Click skipped by cell value");
            return Ok(());
        }
        for alternative in xpaths.split('|').map(str::trim).filter(|x| !x.is_empty()) {
            let Some(element) = self.dom.find_element(&Selector::xpath(alternative)).await? else {
                debug!("Click alternative {} not found", alternative);
                continue;
            };
            self.dom.scroll_into_view(&element).await?;
            self.dom.highlight(&element).await?;
            self.sleep(ctx, self.timing.click_delay).await?;

            let button = self.dom.nested_button(&element).await?;
            if !self.dom.click_element(&element).await? {
                return Err(ActionError::NotInteractable(alternative.to_string()).into());
            }
            if let Some(button) = button {
                // the outer click may already have replaced the document
                if let Err(e) = self.dom.click_element(&button).await {
                    debug!("Nested button click ignored: {}", e);
                }
            }
            info!(row_index = ctx.row_index, "Clicked {}", alternative);
            return self.sleep(ctx, self.timing.click_settle).await;
        }
        Err(FlowError::ElementNotFound(xpaths.to_string()))
    }

    async fn wait(
        &self,
        duration: &WaitDuration,
        log: Option<&str>,
        ctx: &ExecContext,
    ) -> Result<(), FlowError> {
        let secs = match duration {
            WaitDuration::Fixed(secs) => *secs,
            WaitDuration::Range { min, max } => rand::thread_rng().gen_range(*min..=*max),
            WaitDuration::Invalid(raw) => {
                return Err(FlowError::Configuration(format!(
                    "invalid wait duration '{}'",
                    raw
                )))
            }
        };
        if let Some(message) = log {
            info!(row_index = ctx.row_index, "{}", message);
        }
        let duration = Duration::try_from_secs_f64(secs).map_err(|_| {
            FlowError::Configuration(format!("invalid wait duration {}s", secs))
        })?;
        debug!("Waiting {:.2}s", secs);
        self.sleep(ctx, duration).await
    }

    async fn wait_for(
        &self,
        xpath: &str,
        timeout_secs: Option<u64>,
        must_be_visible: bool,
        ctx: &ExecContext,
    ) -> Result<(), FlowError> {
        let timeout = self.wait_timeout(timeout_secs, self.timing.wait_for_timeout);
        let exec = ExecCtx::new(timeout, ctx.cancel.clone());
        let started = Instant::now();
        match wait_for_element(&*self.dom, &exec, &Selector::xpath(xpath), must_be_visible).await
        {
            Ok(_) => {
                debug!("Element {} ready after {:?}", xpath, started.elapsed());
                Ok(())
            }
            Err(ActionError::WaitTimeout(_)) => Err(FlowError::Timeout(format!(
                "WaitFor timeout ({}s): {} after {:.1}s",
                timeout.as_secs(),
                xpath,
                started.elapsed().as_secs_f64()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_url(
        &self,
        pattern: &str,
        timeout_secs: Option<u64>,
        use_regex: bool,
        ctx: &ExecContext,
    ) -> Result<(), FlowError> {
        let matcher = UrlPattern::new(pattern, use_regex)?;
        let timeout = self.wait_timeout(timeout_secs, self.timing.wait_url_timeout);
        let exec = ExecCtx::new(timeout, ctx.cancel.clone());
        let what = format!("url matching '{}'", pattern);
        match wait_for_url(
            &*self.dom,
            &exec,
            self.timing.url_poll_interval,
            &what,
            |url| matcher.matches(url),
        )
        .await
        {
            Ok(url) => {
                debug!("URL matched: {}", url);
                Ok(())
            }
            Err(ActionError::WaitTimeout(_)) => {
                let current = self.dom.current_url().await.unwrap_or_default();
                Err(FlowError::Timeout(format!(
                    "WaitURL timeout ({}s): expected '{}', current '{}'",
                    timeout.as_secs(),
                    pattern,
                    current
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Start a navigation after announcing it to the host
    ///
    /// The unload normally cancels the row while the grace sleep runs. Returning
    /// means the page survived (same-document navigation or a slow unload).
    async fn navigate(&self, url: &str, ctx: &ExecContext) -> Result<(), FlowError> {
        let url = sanitize_url(url)?;
        self.host.will_navigate(ctx.token, ctx.cursor).await?;
        info!(row_index = ctx.row_index, "Navigating to {}", url);
        self.dom.navigate(&url).await?;
        self.sleep(ctx, self.timing.navigation_grace).await
    }

    async fn url(
        &self,
        target: &str,
        prelink: &str,
        columns: &ColumnSpec,
        ctx: &ExecContext,
    ) -> Result<(), FlowError> {
        let target_pattern = wildcard_regex(target)?;
        let current = self.dom.current_url().await?;
        if target_pattern.is_match(&current) {
            info!("Already on target {}", target);
            return Ok(());
        }
        if !current.contains(prelink) {
            self.navigate(prelink, ctx).await?;
        }
        self.run_columns(columns, ctx).await?;
        self.navigate(target, ctx).await
    }

    async fn check_login(
        &self,
        logged_in_xpath: &str,
        login_url: &str,
        login_columns: &ColumnSpec,
        target_url: &str,
        ctx: &ExecContext,
    ) -> Result<(), FlowError> {
        let probe = ExecCtx::new(self.timing.login_check_timeout, ctx.cancel.clone());
        let logged_in = element_exists(
            &*self.dom,
            &probe,
            &Selector::xpath(logged_in_xpath),
            self.timing.login_check_timeout,
        )
        .await?;

        if logged_in {
            info!("Session active");
            let current = self.dom.current_url().await?;
            if !current.contains(target_url) {
                self.navigate(target_url, ctx).await?;
            }
            return Ok(());
        }

        info!("Not logged in, running login columns {}", login_columns);
        let current = self.dom.current_url().await?;
        if !current.contains(login_url) {
            self.navigate(login_url, ctx).await?;
        }
        self.run_columns(login_columns, ctx).await?;
        self.navigate(target_url, ctx).await
    }

    async fn if_exists(
        &self,
        xpath: &str,
        columns: &ColumnSpec,
        else_columns: Option<&ColumnSpec>,
        ctx: &ExecContext,
    ) -> Result<(), FlowError> {
        let probe = ExecCtx::new(Duration::ZERO, ctx.cancel.clone());
        let exists =
            element_exists(&*self.dom, &probe, &Selector::xpath(xpath), Duration::ZERO).await?;

        if exists {
            debug!("Condition met, executing {}", columns);
            self.run_columns(columns, ctx).await
        } else if let Some(else_columns) = else_columns {
            debug!("Condition not met, executing else {}", else_columns);
            self.run_columns(else_columns, ctx).await
        } else {
            debug!("Condition not met, no else branch");
            Ok(())
        }
    }

    async fn if_compare(
        &self,
        xpath: &str,
        source: Option<&str>,
        operator: CompareOp,
        target: Option<&str>,
        columns: &ColumnSpec,
        ctx: &ExecContext,
    ) -> Result<(), FlowError> {
        let selector = Selector::xpath(xpath);
        let has_xpath = !xpath.is_empty() && xpath != "null";
        let target = target.unwrap_or("").trim();

        let condition_met = if operator == CompareOp::Exists {
            match self.dom.find_element(&selector).await? {
                Some(element) if has_xpath => self.dom.is_visible(&element).await?,
                _ => false,
            }
        } else {
            let reads_element = source.map_or(true, |s| s.is_empty() || s == "text");
            let actual = if has_xpath && reads_element {
                match self.dom.find_element(&selector).await? {
                    Some(element) => self.dom.read_value(&element).await?.trim().to_string(),
                    None => String::new(),
                }
            } else {
                source.unwrap_or("").to_string()
            };
            match operator {
                CompareOp::Eq => actual == target,
                CompareOp::Ne => actual != target,
                CompareOp::Contains => actual.contains(target),
                CompareOp::Regex => Regex::new(target)
                    .map_err(|e| {
                        FlowError::Configuration(format!("invalid regex '{}': {}", target, e))
                    })?
                    .is_match(&actual),
                CompareOp::Exists => false,
            }
        };

        if condition_met {
            debug!("Comparison {:?} met, executing {}", operator, columns);
            self.run_columns(columns, ctx).await
        } else {
            debug!("Comparison {:?} not met", operator);
            Ok(())
        }
    }

    async fn conditional(
        &self,
        when_true: &str,
        when_false: &str,
        ctx: &ExecContext,
    ) -> Result<(), FlowError> {
        let cell = ctx.cell_value.trim().to_lowercase();
        let target = if TRUTHY.contains(&cell.as_str()) {
            when_true
        } else {
            when_false
        };
        match self.dom.find_element(&Selector::xpath(target)).await? {
            Some(element) => {
                if !self.dom.fill_element(&element, "true").await? {
                    warn!("Conditional target {} refused the fill", target);
                }
            }
            None => warn!("Conditional target {} not found", target),
        }
        self.sleep(ctx, self.timing.fill_settle).await
    }

    async fn run_macro(
        &self,
        name: &str,
        args: &[String],
        ctx: &ExecContext,
    ) -> Result<(), FlowError> {
        let body = self
            .macros
            .resolve(name)
            .await
            .ok_or_else(|| FlowError::Configuration(format!("Macro not found: {}", name)))?;
        self.check_depth(ctx)?;
        info!("Running macro {} ({} commands)", name, body.len());

        let nested = ctx.nested(&ctx.cell_value);
        for template in &body {
            if ctx.is_cancelled() {
                return Err(FlowError::Cancelled);
            }
            let command = substitute_macro_params(template, args, &ctx.row_data);
            self.process_command(&command, &nested).await?;
        }
        Ok(())
    }

    async fn extract(&self, xpath: &str, var_name: &str, ctx: &ExecContext) -> Result<(), FlowError> {
        let reason = match self.read_element(xpath, ctx).await {
            Ok(value) => {
                info!(
                    variable = var_name,
                    value = %redact(var_name, &value),
                    "Extracted value"
                );
                match self.host.set_variable(var_name, &value).await? {
                    true => return Ok(()),
                    false => "variable store is full".to_string(),
                }
            }
            Err(e) if e.is_stop() => return Err(e),
            Err(e) => e.to_string(),
        };

        if ctx.policy().on_error == ErrorPolicy::Skip {
            warn!("Extract into {} failed, storing empty value: {}", var_name, reason);
            self.host.set_variable(var_name, "").await?;
            return Ok(());
        }
        Err(FlowError::ExtractFailed {
            var: var_name.to_string(),
            reason,
        })
    }

    async fn read_element(&self, xpath: &str, ctx: &ExecContext) -> Result<String, FlowError> {
        let exec = ExecCtx::new(self.timing.extract_timeout, ctx.cancel.clone());
        let element = match wait_for_element(&*self.dom, &exec, &Selector::xpath(xpath), false).await
        {
            Ok(element) => element,
            Err(ActionError::WaitTimeout(_)) => {
                return Err(FlowError::ElementNotFound(xpath.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        self.dom.highlight(&element).await?;
        Ok(self.dom.read_value(&element).await?)
    }

    /// Fill the first element that accepts the value, trying the target as an
    /// XPath, an input name and an id in turn
    async fn fill(&self, xpath: &str, value: Option<&str>, ctx: &ExecContext) -> Result<(), FlowError> {
        let raw_value = value.unwrap_or(&ctx.cell_value);
        let value = if raw_value.contains("${") {
            let globals = self.fetch_variables().await;
            let scope = ScopedVariables::new(
                &ctx.row_data,
                &globals,
                ctx.sequence_number,
                ctx.row_index,
            );
            substitute(raw_value, &scope)
        } else {
            raw_value.to_string()
        };

        for selector in [
            Selector::xpath(xpath),
            Selector::input_name(xpath),
            Selector::id(xpath),
        ] {
            for element in self.dom.find_elements(&selector).await? {
                if ctx.is_cancelled() {
                    return Err(FlowError::Cancelled);
                }
                self.dom.highlight(&element).await?;
                if self.dom.fill_element(&element, &value).await? {
                    debug!("Filled {} ({} chars)", selector, value.chars().count());
                    return self.sleep(ctx, self.timing.fill_settle).await;
                }
            }
        }
        Err(FlowError::ElementNotFound(xpath.to_string()))
    }

    /// Run the commands stored in `columns` of the current row, with an empty
    /// cell value
    async fn run_columns(&self, columns: &ColumnSpec, ctx: &ExecContext) -> Result<(), FlowError> {
        let letters = columns
            .columns()
            .map_err(|e| FlowError::Configuration(e.to_string()))?;
        self.check_depth(ctx)?;

        let nested = ctx.nested("");
        for letter in letters {
            if ctx.is_cancelled() {
                return Err(FlowError::Cancelled);
            }
            let Some(command) = ctx.row_data.get(&letter).map(|c| c.trim().to_string()) else {
                continue;
            };
            if command.is_empty() {
                continue;
            }
            debug!("Running column {}: {}", letter, command);
            self.process_command(&command, &nested).await?;
        }
        Ok(())
    }

    fn check_depth(&self, ctx: &ExecContext) -> Result<(), FlowError> {
        if ctx.depth >= self.timing.max_nesting_depth {
            return Err(FlowError::Configuration(format!(
                "commands nested deeper than {} levels",
                self.timing.max_nesting_depth
            )));
        }
        Ok(())
    }
}

enum UrlPattern {
    Substring(String),
    Regex(Regex),
}

impl UrlPattern {
    fn new(pattern: &str, use_regex: bool) -> Result<Self, FlowError> {
        if !use_regex {
            return Ok(UrlPattern::Substring(pattern.to_string()));
        }
        Regex::new(pattern)
            .map(UrlPattern::Regex)
            .map_err(|e| FlowError::Configuration(format!("invalid regex '{}': {}", pattern, e)))
    }

    fn matches(&self, url: &str) -> bool {
        match self {
            UrlPattern::Substring(needle) => url.contains(needle.as_str()),
            UrlPattern::Regex(re) => re.is_match(url),
        }
    }
}

/// `*` matches any run of characters; everything else is literal.
fn wildcard_regex(pattern: &str) -> Result<Regex, FlowError> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&escaped)
        .map_err(|e| FlowError::Configuration(format!("invalid URL pattern '{}': {}", pattern, e)))
}

/// Refuses empty and script URLs.
pub fn sanitize_url(url: &str) -> Result<String, FlowError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(FlowError::Configuration("empty navigation URL".to_string()));
    }
    if url.to_ascii_lowercase().starts_with("javascript:") {
        return Err(FlowError::Configuration(format!(
            "refusing to navigate to script URL '{}'",
            url
        )));
    }
    Ok(url.to_string())
}
