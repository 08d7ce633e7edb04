//! 上下文窗口管理
//!
//! 每次进入 MessageSummary 时检查历史长度：超过 max_history_before_summary 时，
//! 保留第一条消息，其余替换为一条 "Summary of conversation earlier: ..." 的 ai 消息；否则不做任何修改。

use tracing::{debug, info};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::conversation::{collapse_messages, Message};

pub const SUMMARY_PREFIX: &str = "Summary of conversation earlier: ";

const SUMMARY_INSTRUCTIONS: &str = "You maintain the running memory of an autonomous agent. \
Merge the previous summary with the new messages into one concise summary. Keep ids, cids, \
timestamps, decisions and unresolved problems. Reply with the summary text only.";

#[derive(Debug, Clone)]
pub struct ContextWindowManager {
    max_history_before_summary: usize,
}

impl ContextWindowManager {
    pub fn new(max_history_before_summary: usize) -> Self {
        Self {
            max_history_before_summary,
        }
    }

    pub fn needs_summary(&self, history: &[Message]) -> bool {
        history.len() > self.max_history_before_summary
    }

    /// 必要时压缩历史；返回是否发生了压缩
    pub async fn maybe_summarize(
        &self,
        history: &mut Vec<Message>,
        llm: &dyn LlmClient,
    ) -> Result<bool, AgentError> {
        if !self.needs_summary(history) {
            debug!(len = history.len(), "history short enough, not summarizing");
            return Ok(false);
        }

        let previous = history
            .get(1)
            .map(|m| m.content.as_str())
            .unwrap_or("No previous summary");
        let prompt = vec![
            Message::system(SUMMARY_INSTRUCTIONS),
            Message::user(format!(
                "Previous summary:\n{}\n\nNew messages:\n{}",
                previous,
                collapse_messages(&history[1..])
            )),
        ];
        let summary = llm.complete(&prompt).await?;

        let replaced = history.len() - 1;
        history.truncate(1);
        history.push(Message::assistant(format!("{}{}", SUMMARY_PREFIX, summary.trim())));
        info!(replaced, "history summarized");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::Role;

    fn history(n: usize) -> Vec<Message> {
        (0..n).map(|i| Message::user(format!("m{i}"))).collect()
    }

    #[tokio::test]
    async fn test_summarizes_above_threshold() {
        let llm = ScriptedLlmClient::from_texts(["compressed"]);
        let manager = ContextWindowManager::new(30);
        let mut h = history(31);

        assert!(manager.maybe_summarize(&mut h, &llm).await.unwrap());
        assert_eq!(h.len(), 2);
        assert_eq!(h[0].content, "m0");
        assert_eq!(h[1].role, Role::Assistant);
        assert_eq!(h[1].content, "Summary of conversation earlier: compressed");

        let calls = llm.calls();
        let prompt = &calls[0][1].content;
        assert!(prompt.contains("m1") && prompt.contains("m30"));
        assert!(!prompt.contains("human: m0"));
    }

    #[tokio::test]
    async fn test_noop_at_or_below_threshold() {
        let llm = ScriptedLlmClient::default();
        let manager = ContextWindowManager::new(30);
        let mut h = history(30);
        assert!(!manager.maybe_summarize(&mut h, &llm).await.unwrap());
        assert_eq!(h, history(30));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_idempotent_after_compression() {
        let llm = ScriptedLlmClient::from_texts(["s"]);
        let manager = ContextWindowManager::new(3);
        let mut h = history(5);
        manager.maybe_summarize(&mut h, &llm).await.unwrap();
        let once = h.clone();
        assert!(!manager.maybe_summarize(&mut h, &llm).await.unwrap());
        assert_eq!(h, once);
    }

    #[tokio::test]
    async fn test_summarizer_failure_leaves_history_intact() {
        let llm = ScriptedLlmClient::default();
        let manager = ContextWindowManager::new(2);
        let mut h = history(4);
        assert!(manager.maybe_summarize(&mut h, &llm).await.is_err());
        assert_eq!(h.len(), 4);
    }
}
