//! 无头运行时
//!
//! build_runtime 按配置组装：签名器、内容存储与链客户端（未配置端点时使用进程内实现）、
//! SQLite 记录缓存、记忆账本（启动时与链上状态对照）、检索索引、LLM 客户端、工具注册表与编排器。
//! run_scheduler 执行自调度循环：每次运行结束后把报告摘要与下一次提示拼成新输入，
//! 按报告建议（或默认间隔）休眠，直到收到关闭信号。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{secret_from_env, AppConfig};
use crate::core::RetryConfig;
use crate::ledger::{
    ChainClient, ContentStore, HttpChainClient, HttpContentStore, InMemoryChain, InMemoryContentStore,
    LedgerOptions, MemoryLedger, RecordCache, SchnorrSigner, Signer, UploadOptions,
};
use crate::llm::{create_embedder_from_config, LlmClient, OpenAiClient, RetryingLlmClient, ScriptedLlmClient};
use crate::memory::{MemoryIndex, Message};
use crate::tools::{CurrentTimeTool, SaveExperienceTool, SearchMemoryTool, ToolExecutor, ToolRegistry};
use crate::workflow::{FinalReport, Orchestrator, OrchestratorOptions};

/// 未配置 LLM 时的离线输出：同时满足控制与报告两种结构
const OFFLINE_RESPONSE: &str = r#"{"toolCalls": [], "shouldStop": true, "reason": "No LLM backend configured", "workflowSummary": "No LLM backend configured, nothing was done."}"#;

/// 组装完成的运行时
pub struct AgentRuntime {
    pub config: AppConfig,
    pub orchestrator: Orchestrator,
    /// 未配置签名私钥时为 None（save_experience 不注册）
    pub ledger: Option<MemoryLedger>,
    pub index: Arc<MemoryIndex>,
}

/// 按配置创建 LLM 客户端：provider 为 openai 且有 API Key 时为带重试的 OpenAI 兼容客户端，
/// provider 为 offline、未知或缺少 Key 时为离线 Scripted 客户端
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.trim().to_lowercase();
    let key = match provider.as_str() {
        "openai" => secret_from_env(&cfg.llm.api_key_env),
        "offline" => None,
        other => {
            warn!(provider = other, "unknown LLM provider");
            None
        }
    };
    match key {
        Some(key) => {
            let client = OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                &key,
                Duration::from_secs(cfg.llm.request_timeout_secs),
            );
            info!(model = %cfg.llm.model, "using OpenAI-compatible LLM");
            Arc::new(RetryingLlmClient::new(Arc::new(client), RetryConfig::from(&cfg.retry)))
        }
        None => {
            warn!(%provider, env = %cfg.llm.api_key_env, "no usable LLM backend, using offline client");
            Arc::new(ScriptedLlmClient::default().with_fallback(OFFLINE_RESPONSE))
        }
    }
}

fn create_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ContentStore>> {
    let api_key = secret_from_env(&cfg.ledger.api_key_env);
    Ok(match &cfg.ledger.storage_url {
        Some(url) => Arc::new(
            HttpContentStore::new(url, api_key, cfg.llm.request_timeout_secs)
                .context("Failed to create storage client")?,
        ),
        None => {
            warn!("no storage_url configured, records are kept in process memory");
            Arc::new(InMemoryContentStore::new())
        }
    })
}

fn create_chain(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ChainClient>> {
    let api_key = secret_from_env(&cfg.ledger.api_key_env);
    Ok(match &cfg.ledger.chain_url {
        Some(url) => Arc::new(
            HttpChainClient::new(url, api_key, cfg.llm.request_timeout_secs)
                .context("Failed to create chain client")?,
        ),
        None => {
            warn!("no chain_url configured, anchors are kept in process memory");
            Arc::new(InMemoryChain::new())
        }
    })
}

/// 打开账本并做启动校验；本地链与链上摘要不一致时只记录警告
pub async fn open_ledger(
    cfg: &AppConfig,
    signer: Arc<dyn Signer>,
    cache: Arc<RecordCache>,
    cancel: CancellationToken,
) -> anyhow::Result<MemoryLedger> {
    let options = LedgerOptions {
        agent_version: cfg.app.agent_version.clone(),
        upload: UploadOptions {
            compression: cfg.ledger.compression,
            encryption_password: secret_from_env(&cfg.ledger.encryption_password_env),
            file_name: Some(format!("{}-experience.json", cfg.app.name)),
        },
        retry: RetryConfig::from(&cfg.retry),
        max_traversal_depth: cfg.ledger.max_traversal_depth,
        backfill_depth: cfg.ledger.backfill_depth,
        cancel,
    };
    let (ledger, bootstrap) = MemoryLedger::open(signer, create_store(cfg)?, create_chain(cfg)?, cache, options)
        .await
        .context("Failed to bootstrap ledger")?;
    if bootstrap.pointer_mismatch {
        warn!(head = ?bootstrap.head_cid, "local ledger pointer disagreed with chain at startup");
    }

    let verification = ledger
        .verify_chain(ledger.identity())
        .await
        .context("Failed to verify ledger chain")?;
    if verification.consistent {
        info!(depth = verification.depth, head = ?verification.head_cid, "ledger chain verified");
    } else {
        for detail in &verification.details {
            warn!(%detail, "ledger chain divergence");
        }
    }
    Ok(ledger)
}

/// 按配置组装运行时；签名私钥从配置指定的环境变量读取
pub async fn build_runtime(config: AppConfig, cancel: CancellationToken) -> anyhow::Result<AgentRuntime> {
    let signer: Option<Arc<dyn Signer>> = match secret_from_env(&config.ledger.signing_key_env) {
        Some(key) => Some(Arc::new(
            SchnorrSigner::from_hex(&key).context("Invalid signing key")?,
        )),
        None => {
            warn!(env = %config.ledger.signing_key_env, "no signing key set, ledger disabled");
            None
        }
    };
    let llm = create_llm_from_config(&config);
    assemble_runtime(config, signer, llm, cancel).await
}

/// 用给定的签名器与 LLM 组装运行时
pub async fn assemble_runtime(
    config: AppConfig,
    signer: Option<Arc<dyn Signer>>,
    llm: Arc<dyn LlmClient>,
    cancel: CancellationToken,
) -> anyhow::Result<AgentRuntime> {
    let cache_path = config.cache_path();
    let cache = Arc::new(
        RecordCache::open(&cache_path)
            .with_context(|| format!("Failed to open record cache at {}", cache_path.display()))?,
    );

    let embedder = create_embedder_from_config(
        config.memory.embeddings_enabled,
        config.llm.base_url.as_deref(),
        &config.memory.embedding_model,
        secret_from_env(&config.llm.api_key_env).as_deref(),
    );
    let index = Arc::new(MemoryIndex::new(embedder));
    let indexed = index
        .rebuild_from(&cache)
        .await
        .context("Failed to rebuild memory index")?;
    info!(indexed, "memory index rebuilt from cache");

    let ledger = match signer {
        Some(signer) => Some(open_ledger(&config, signer, cache.clone(), cancel.child_token()).await?),
        None => None,
    };

    let mut registry = ToolRegistry::new();
    registry.register(CurrentTimeTool);
    registry.register(SearchMemoryTool::new(index.clone(), config.tools.search_top_k));
    if let Some(ledger) = &ledger {
        registry.register(SaveExperienceTool::new(ledger.clone(), index.clone()));
    }
    info!(tools = ?registry.tool_names(), "tools registered");

    let executor = Arc::new(ToolExecutor::new(
        Arc::new(registry),
        Duration::from_secs(config.tools.tool_timeout_secs),
    ));
    let orchestrator = Orchestrator::new(llm, executor, OrchestratorOptions::from_config(&config))
        .with_cancel_token(cancel);

    Ok(AgentRuntime {
        config,
        orchestrator,
        ledger,
        index,
    })
}

/// 下一次运行的基础提示：报告给出的 nextPrompt 优先，否则沿用上一次
pub fn next_base_prompt(report: &FinalReport, previous: &str) -> String {
    report.next_prompt.clone().unwrap_or_else(|| previous.to_string())
}

/// 下一次运行的输入：本次摘要 + 基础提示
pub fn next_input(report: &FinalReport, base_prompt: &str) -> String {
    format!("{}\n{}", report.summary, base_prompt)
}

/// 距下一次运行的等待时间
pub fn next_delay(report: &FinalReport, default_interval_secs: u64) -> Duration {
    report
        .seconds_until_next
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or_else(|| Duration::from_secs(default_interval_secs))
}

/// 自调度循环：运行、休眠、再运行，直到 cancel 被触发
pub async fn run_scheduler(runtime: &AgentRuntime, cancel: CancellationToken) {
    let workflow = &runtime.config.workflow;
    let mut base_prompt = workflow.initial_prompt.clone();
    let mut input = base_prompt.clone();

    loop {
        let report = runtime.orchestrator.run_reported(vec![Message::user(input.clone())]).await;
        let (_, _, total_tokens) = runtime.orchestrator.token_usage();
        info!(
            summary = %report.summary,
            failed = report.is_failure(),
            next_in = ?report.seconds_until_next,
            total_tokens,
            "workflow report"
        );
        if cancel.is_cancelled() {
            break;
        }

        base_prompt = next_base_prompt(&report, &base_prompt);
        input = next_input(&report, &base_prompt);
        let delay = if workflow.self_schedule {
            next_delay(&report, workflow.default_interval_secs)
        } else {
            Duration::from_secs(workflow.default_interval_secs)
        };
        info!(delay_secs = delay.as_secs_f64(), "next workflow scheduled");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    info!("scheduler stopped");
}
