//! Scripted action runner for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::{Action, ActionError, ActionOutput, ActionRunner};

#[derive(Debug, Clone)]
enum Scripted {
    Output(ActionOutput),
    Timeout,
}

/// [`ActionRunner`] that records every invocation and answers from a script.
///
/// Actions without a scripted answer succeed with empty output. Responses are
/// keyed by [`Action::label`], e.g. `"start app"`.
#[derive(Debug, Default)]
pub struct MockActionRunner {
    responses: Mutex<HashMap<String, Scripted>>,
    invocations: Mutex<Vec<Action>>,
    delay: Option<Duration>,
}

impl MockActionRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every action for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer `label` with `output` from now on.
    pub fn respond(&self, label: &str, output: ActionOutput) {
        self.lock_responses()
            .insert(label.to_string(), Scripted::Output(output));
    }

    /// Make `label` fail with [`ActionError::Timeout`] from now on.
    pub fn respond_timeout(&self, label: &str) {
        self.lock_responses()
            .insert(label.to_string(), Scripted::Timeout);
    }

    pub fn invocations(&self) -> Vec<Action> {
        self.invocations
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    fn lock_responses(&self) -> std::sync::MutexGuard<'_, HashMap<String, Scripted>> {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ActionRunner for MockActionRunner {
    async fn run(&self, action: &Action) -> Result<ActionOutput, ActionError> {
        let label = action.label();
        debug!("MockActionRunner: {}", label);

        if let Ok(mut calls) = self.invocations.lock() {
            calls.push(action.clone());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.lock_responses().get(&label).cloned();
        match scripted {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::Timeout) => Err(ActionError::Timeout {
                command: label,
                after: self.delay.unwrap_or_default(),
            }),
            None => Ok(ActionOutput::success("")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use control_plane_shared_types::ServerType;

    #[tokio::test]
    async fn test_scripted_responses() {
        let runner = MockActionRunner::new();
        runner.respond("start app", ActionOutput::failure(1, "disk full"));
        runner.respond_timeout("stop gpu");

        let out = runner.run(&Action::Start(ServerType::App)).await.unwrap();
        assert_eq!(out.stderr, "disk full");

        assert!(matches!(
            runner.run(&Action::Stop(ServerType::Gpu)).await,
            Err(ActionError::Timeout { .. })
        ));

        assert!(runner.run(&Action::Status).await.unwrap().is_success());
        assert_eq!(runner.invocation_count(), 3);
        assert_eq!(runner.invocations()[0], Action::Start(ServerType::App));
    }
}
