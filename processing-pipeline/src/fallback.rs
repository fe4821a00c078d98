//! Ordered fallback chains: try each step in turn and keep the first result.

use async_trait::async_trait;
use common::{
    error::AppError,
    utils::retry::{retry_transient, RetryPolicy},
};
use tracing::{debug, warn};

/// One candidate source in a [`Waterfall`].
#[async_trait]
pub trait FallbackStep<I, T>: Send + Sync
where
    I: Sync + ?Sized,
    T: Send,
{
    fn name(&self) -> &str;

    /// `Ok(None)` declines and hands over to the next step.
    async fn attempt(&self, input: &I) -> Result<Option<T>, AppError>;
}

/// Runs its steps in order and stops at the first one that produces a value.
///
/// Each step is retried on transient errors under the shared policy. An error
/// that survives the retries is logged and treated as a decline, so one broken
/// provider never ends the chain.
pub struct Waterfall<I: ?Sized, T> {
    steps: Vec<Box<dyn FallbackStep<I, T>>>,
    retry: RetryPolicy,
}

impl<I, T> Waterfall<I, T>
where
    I: Sync + ?Sized,
    T: Send,
{
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            steps: Vec::new(),
            retry,
        }
    }

    /// Append a step after the existing ones.
    #[must_use]
    pub fn then(mut self, step: impl FallbackStep<I, T> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// The first accepted value with the name of the step that produced it.
    pub async fn run(&self, input: &I) -> Option<(&str, T)> {
        for step in &self.steps {
            let name = step.name();
            match retry_transient(self.retry, || step.attempt(input)).await {
                Ok(Some(value)) => return Some((name, value)),
                Ok(None) => debug!(step = name, "step declined"),
                Err(err) => warn!(step = name, error = %err, "step failed; falling through"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Stand-in for a mirror list: returns a host name or gives up.
    struct Mirror {
        name: &'static str,
        transient_failures: AtomicUsize,
        hard_failure: bool,
        answer: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl Mirror {
        fn new(name: &'static str, answer: Option<&'static str>) -> Self {
            Self {
                name,
                transient_failures: AtomicUsize::new(0),
                hard_failure: false,
                answer,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FallbackStep<str, String> for std::sync::Arc<Mirror> {
        fn name(&self) -> &str {
            self.name
        }

        async fn attempt(&self, path: &str) -> Result<Option<String>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hard_failure {
                return Err(AppError::Validation("mirror rejected the path".into()));
            }
            if self.transient_failures.load(Ordering::SeqCst) > 0 {
                self.transient_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(AppError::Provider("mirror busy".into()));
            }
            Ok(self.answer.map(|host| format!("https://{host}/{path}")))
        }
    }

    fn mirror(name: &'static str, answer: Option<&'static str>) -> std::sync::Arc<Mirror> {
        std::sync::Arc::new(Mirror::new(name, answer))
    }

    #[tokio::test]
    async fn first_acceptance_stops_the_chain() {
        let empty = mirror("empty", None);
        let primary = mirror("primary", Some("a.example"));
        let backup = mirror("backup", Some("b.example"));
        let chain = Waterfall::new(RetryPolicy::immediate(2))
            .then(empty.clone())
            .then(primary.clone())
            .then(backup.clone());

        let found = chain.run("pkg.tar").await;

        assert_eq!(found, Some(("primary", "https://a.example/pkg.tar".to_string())));
        assert_eq!((empty.calls(), primary.calls(), backup.calls()), (1, 1, 0));
        assert_eq!(chain.step_names(), vec!["empty", "primary", "backup"]);
    }

    #[tokio::test]
    async fn failures_are_isolated_per_step() {
        let busy = mirror("busy", Some("busy.example"));
        busy.transient_failures.store(5, Ordering::SeqCst);
        let broken = std::sync::Arc::new(Mirror {
            hard_failure: true,
            ..Mirror::new("broken", Some("broken.example"))
        });
        let backup = mirror("backup", Some("b.example"));
        let chain = Waterfall::new(RetryPolicy::immediate(2))
            .then(busy.clone())
            .then(broken.clone())
            .then(backup.clone());

        let found = chain.run("pkg.tar").await;

        assert_eq!(found.map(|(step, _)| step), Some("backup"));
        assert_eq!(busy.calls(), 2, "transient errors use the retry budget");
        assert_eq!(broken.calls(), 1, "permanent errors are not retried");
    }

    #[tokio::test]
    async fn transient_error_recovers_within_the_step() {
        let flaky = mirror("flaky", Some("a.example"));
        flaky.transient_failures.store(1, Ordering::SeqCst);
        let chain = Waterfall::new(RetryPolicy::immediate(2)).then(flaky.clone());

        assert_eq!(
            chain.run("pkg.tar").await,
            Some(("flaky", "https://a.example/pkg.tar".to_string()))
        );
        assert_eq!(flaky.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_chain_yields_nothing() {
        let chain: Waterfall<str, String> = Waterfall::new(RetryPolicy::immediate(1))
            .then(mirror("empty", None));
        assert_eq!(chain.run("pkg.tar").await, None);

        let no_steps: Waterfall<str, String> = Waterfall::new(RetryPolicy::immediate(1));
        assert_eq!(no_steps.run("pkg.tar").await, None);
    }
}
