//! Await-with-deadline-and-cancel
//!
//! Every suspension in the interpreter (fixed waits, element polling, URL
//! polling, the per-command timeout wrapper) goes through [`with_deadline`].

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    errors::ActionError,
    primitives::DomActions,
    types::{ElementHandle, ExecCtx, Selector},
};

/// Poll cadence for element and URL checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Races `fut` against the context deadline and its cancellation token.
///
/// Losing futures are dropped, which is how element polls and nested waits
/// get torn down.
pub async fn with_deadline<F, T, E>(ctx: &ExecCtx, what: &str, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<ActionError>,
{
    if ctx.is_cancelled() {
        return Err(ActionError::Interrupted(format!("{} cancelled", what)).into());
    }
    tokio::select! {
        biased;
        _ = ctx.cancel_token.cancelled() => {
            Err(ActionError::Interrupted(format!("{} cancelled", what)).into())
        }
        _ = tokio::time::sleep_until(ctx.deadline) => {
            Err(ActionError::WaitTimeout(format!("{} exceeded its deadline", what)).into())
        }
        result = fut => result,
    }
}

/// Re-runs `check` every `interval` until it yields a value or the context
/// expires.
pub async fn poll_until<F, Fut, T>(
    ctx: &ExecCtx,
    interval: Duration,
    what: &str,
    mut check: F,
) -> Result<T, ActionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ActionError>>,
{
    let started = Instant::now();
    let polling = async {
        loop {
            if let Some(value) = check().await? {
                return Ok(value);
            }
            tokio::time::sleep(interval).await;
        }
    };
    with_deadline::<_, _, ActionError>(ctx, what, polling)
        .await
        .map_err(|err| match err {
        ActionError::WaitTimeout(_) => ActionError::WaitTimeout(format!(
            "{} not satisfied after {:.1}s",
            what,
            started.elapsed().as_secs_f64()
        )),
        other => other,
    })
}

/// Sleeps unless the token fires first.
pub async fn cancellable_sleep(
    token: &CancellationToken,
    duration: Duration,
) -> Result<(), ActionError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ActionError::Interrupted("sleep cancelled".to_string())),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Waits for `selector` to resolve (and be visible when asked).
pub async fn wait_for_element<D>(
    dom: &D,
    ctx: &ExecCtx,
    selector: &Selector,
    must_be_visible: bool,
) -> Result<ElementHandle, ActionError>
where
    D: DomActions + ?Sized,
{
    let what = format!("element {}", selector);
    poll_until(ctx, DEFAULT_POLL_INTERVAL, &what, move || async move {
        match dom.find_element(selector).await? {
            Some(element) if !must_be_visible => Ok(Some(element)),
            Some(element) => {
                if dom.is_visible(&element).await? {
                    Ok(Some(element))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    })
    .await
}

/// `true` if `selector` resolves within `timeout`; a zero timeout checks once.
/// Cancellation still errors.
pub async fn element_exists<D>(
    dom: &D,
    ctx: &ExecCtx,
    selector: &Selector,
    timeout: Duration,
) -> Result<bool, ActionError>
where
    D: DomActions + ?Sized,
{
    if dom.find_element(selector).await?.is_some() {
        return Ok(true);
    }
    if timeout.is_zero() {
        return Ok(false);
    }
    let child = ctx.with_timeout(timeout);
    match wait_for_element(dom, &child, selector, false).await {
        Ok(_) => Ok(true),
        Err(ActionError::WaitTimeout(_)) => {
            debug!(action_id = %ctx.action_id, selector = %selector, "element absent");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Waits until the current URL satisfies `matches`; returns that URL.
pub async fn wait_for_url<D, M>(
    dom: &D,
    ctx: &ExecCtx,
    interval: Duration,
    what: &str,
    matches: M,
) -> Result<String, ActionError>
where
    D: DomActions + ?Sized,
    M: Fn(&str) -> bool,
{
    let matches = &matches;
    poll_until(ctx, interval, what, move || async move {
        let url = dom.current_url().await?;
        Ok(if matches(&url) { Some(url) } else { None })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn deadline_wins_over_slow_future() {
        let ctx = ExecCtx::new(Duration::from_millis(50), CancellationToken::new());
        let result: Result<(), ActionError> = with_deadline(&ctx, "slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ActionError::WaitTimeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts() {
        let token = CancellationToken::new();
        let ctx = ExecCtx::new(Duration::from_secs(60), token.clone());
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let result: Result<(), ActionError> =
            with_deadline(&ctx, "forever", std::future::pending()).await;
        assert!(matches!(result, Err(ActionError::Interrupted(_))));
        assert!(cancellable_sleep(&token, Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_returns_first_value() {
        let ctx = ExecCtx::new(Duration::from_secs(2), CancellationToken::new());
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let value = poll_until(&ctx, Duration::from_millis(100), "counter", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(if n >= 3 { Some(n) } else { None })
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_reports_elapsed_on_timeout() {
        let ctx = ExecCtx::new(Duration::from_millis(300), CancellationToken::new());
        let err = poll_until(&ctx, Duration::from_millis(100), "never", || async {
            Ok::<Option<()>, ActionError>(None)
        })
        .await
        .unwrap_err();
        match err {
            ActionError::WaitTimeout(msg) => assert!(msg.contains("never not satisfied after 0.3s")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn child_context_never_extends_parent() {
        let ctx = ExecCtx::new(Duration::from_millis(10), CancellationToken::new());
        let child = ctx.with_timeout(Duration::from_secs(10));
        assert!(child.deadline <= ctx.deadline);
    }
}
