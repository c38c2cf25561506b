//! In-memory executor with scripted poll responses

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::database::SqlExecutor;
use crate::error::{ListenerError, Result};

/// Marker that identifies the receive statement
const POLL_MARKER: &str = "WAITFOR (";

/// How long an idle poll waits before reporting a timeout
const IDLE_POLL_WAIT: Duration = Duration::from_millis(10);

/// Outcome of one scripted poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollResponse {
    Message(String),
    Timeout,
    Failure(String),
}

#[derive(Debug, Default)]
struct ScriptState {
    statements: Vec<String>,
    executed: Vec<String>,
    polls: usize,
    responses: VecDeque<PollResponse>,
    failing_fragments: Vec<String>,
    column_values: Vec<String>,
}

/// `SqlExecutor` that records every statement and replays scripted polls
///
/// Clones share state, so a test can keep one handle while the listener owns
/// another. Polls with nothing scripted sleep briefly and time out, like a
/// `WAITFOR` with an empty queue.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecutor {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message for a future poll
    pub fn push_message<S: Into<String>>(&self, message: S) {
        self.push_response(PollResponse::Message(message.into()));
    }

    pub fn push_timeout(&self) {
        self.push_response(PollResponse::Timeout);
    }

    /// Make a future poll fail with an execution error
    pub fn push_failure<S: Into<String>>(&self, message: S) {
        self.push_response(PollResponse::Failure(message.into()));
    }

    pub fn push_response(&self, response: PollResponse) {
        self.state.lock().responses.push_back(response);
    }

    /// Fail every non-poll statement containing `fragment`
    pub fn fail_statements_containing<S: Into<String>>(&self, fragment: S) {
        self.state.lock().failing_fragments.push(fragment.into());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing_fragments.clear();
    }

    /// Rows returned by `query_column_text`
    pub fn set_column_values(&self, values: Vec<String>) {
        self.state.lock().column_values = values;
    }

    /// Every statement received, in order, polls included
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    /// Statements received through `execute`
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    pub fn poll_count(&self) -> usize {
        self.state.lock().polls
    }

    /// Scripted responses not consumed yet
    pub fn pending_responses(&self) -> usize {
        self.state.lock().responses.len()
    }

    /// Wait until at least `count` polls have been made
    pub async fn wait_for_polls(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.poll_count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        self.poll_count() >= count
    }

    fn record(&self, sql: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.statements.push(sql.to_string());

        if let Some(fragment) = state
            .failing_fragments
            .iter()
            .find(|fragment| sql.contains(fragment.as_str()))
        {
            return Err(ListenerError::execution(format!(
                "scripted failure for statement containing {fragment:?}"
            )));
        }
        Ok(())
    }

    async fn poll(&self) -> Result<Option<String>> {
        let response = {
            let mut state = self.state.lock();
            state.polls += 1;
            state.responses.pop_front()
        };

        match response {
            Some(PollResponse::Message(message)) => Ok(Some(message)),
            Some(PollResponse::Timeout) => Ok(None),
            Some(PollResponse::Failure(message)) => Err(ListenerError::execution(message)),
            None => {
                tokio::time::sleep(IDLE_POLL_WAIT).await;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl SqlExecutor for ScriptedExecutor {
    async fn execute(&self, sql: &str, _timeout: Duration) -> Result<()> {
        self.state.lock().executed.push(sql.to_string());
        self.record(sql)
    }

    async fn query_scalar_text(&self, sql: &str, _timeout: Duration) -> Result<Option<String>> {
        if sql.contains(POLL_MARKER) {
            self.state.lock().statements.push(sql.to_string());
            return self.poll().await;
        }
        self.record(sql)?;
        Ok(None)
    }

    async fn query_column_text(&self, sql: &str, _timeout: Duration) -> Result<Vec<String>> {
        self.record(sql)?;
        Ok(self.state.lock().column_values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_polls_replay_script_in_order() {
        let executor = ScriptedExecutor::new();
        executor.push_message("first");
        executor.push_timeout();
        executor.push_failure("connection reset");

        let poll = "WAITFOR (RECEIVE ...)";
        assert_eq!(
            executor.query_scalar_text(poll, TIMEOUT).await.unwrap(),
            Some("first".to_string())
        );
        assert_eq!(executor.query_scalar_text(poll, TIMEOUT).await.unwrap(), None);
        assert!(executor.query_scalar_text(poll, TIMEOUT).await.is_err());
        // Nothing scripted: idle timeout
        assert_eq!(executor.query_scalar_text(poll, TIMEOUT).await.unwrap(), None);
        assert_eq!(executor.poll_count(), 4);
    }

    #[tokio::test]
    async fn test_failure_injection_applies_to_matching_statements() {
        let executor = ScriptedExecutor::new();
        executor.fail_statements_containing("DROP");

        assert!(executor.execute("SELECT 1", TIMEOUT).await.is_ok());
        assert!(executor.execute("DROP QUEUE q", TIMEOUT).await.is_err());

        executor.clear_failures();
        assert!(executor.execute("DROP QUEUE q", TIMEOUT).await.is_ok());
        assert_eq!(executor.executed().len(), 3);
    }
}
