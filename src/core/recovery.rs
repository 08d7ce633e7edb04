//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供工作流编排器决定是整步重试还是终止运行。

use crate::core::{AgentError, RecoveryAction};
use crate::ledger::LedgerError;

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 网络类失败（LLM、存储、链）允许整步重试；接口拒绝、解析、失控、取消等一律终止
    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::TransientNetwork(_) => RecoveryAction::RetryStep,
            AgentError::Ledger(LedgerError::TransientNetwork(_)) => RecoveryAction::RetryStep,
            AgentError::RunawayWorkflow { .. } => RecoveryAction::Abort,
            AgentError::Cancelled => RecoveryAction::Abort,
            _ => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_transient_network_retries() {
        let engine = RecoveryEngine::new();
        let err = AgentError::TransientNetwork("502 bad gateway".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::RetryStep);
    }

    #[test]
    fn test_recovery_rejected_llm_request_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::from(crate::llm::LlmError::Api("400 invalid model".to_string()));
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_transient_ledger_error_retries() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Ledger(LedgerError::TransientNetwork("reset".to_string()));
        assert_eq!(engine.handle(&err), RecoveryAction::RetryStep);
    }

    #[test]
    fn test_recovery_anchor_failure_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Ledger(LedgerError::AnchorFailure {
            cid: "bafk".to_string(),
            reason: "rpc down".to_string(),
        });
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_runaway_aborts() {
        let engine = RecoveryEngine::new();
        let err = AgentError::RunawayWorkflow { max_steps: 3 };
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_cancelled() {
        let engine = RecoveryEngine::new();
        assert_eq!(engine.handle(&AgentError::Cancelled), RecoveryAction::Abort);
    }
}
