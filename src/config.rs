//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AUTOBEE__*` 覆盖（双下划线表示嵌套，如 `AUTOBEE__WORKFLOW__MAX_STEPS=40`）。
//! 密钥类（API Key、签名私钥、加密口令）只通过配置中指定名字的环境变量读取，不写入 TOML。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub workflow: WorkflowSection,
    pub retry: RetrySection,
    pub ledger: LedgerSection,
    pub tools: ToolsSection,
    pub memory: MemorySection,
}

/// [app] 段：智能体名称、版本、数据目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 写入每条记忆记录的 agentVersion
    pub agent_version: String,
    /// 本地缓存等数据文件的根目录
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "autobee".to_string(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai（任意 OpenAI 兼容端点）或 offline；openai 未设置 API Key 时同样退回离线客户端
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key_env: String,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// [workflow] 段：状态机步数上限、剪枝参数、自调度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    /// 单次运行内 Input 访问次数上限
    pub max_steps: usize,
    /// 历史条数超过此值时在 MessageSummary 中压缩
    pub max_history_before_summary: usize,
    /// 每次决策时发送给模型的最近消息条数（不含首条锚定消息）
    pub max_retained_queue_size: usize,
    /// 结束报告中是否请求下一次运行的提示与间隔
    pub self_schedule: bool,
    /// 报告未给出间隔时的默认等待（秒）
    pub default_interval_secs: u64,
    /// 首次运行的输入
    pub initial_prompt: String,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_history_before_summary: 30,
            max_retained_queue_size: 50,
            self_schedule: true,
            default_interval_secs: 3600,
            initial_prompt: "Review what you have done before, decide what is worth doing now, \
                and save any significant experience to permanent storage."
                .to_string(),
        }
    }
}

/// [retry] 段：网络操作的重试次数与退避
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// 编排器层面对整步的额外重试次数
    pub step_retries: usize,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            step_retries: 1,
        }
    }
}

/// [ledger] 段：内容存储、链端点、签名与本地缓存
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    /// 内容寻址存储的 HTTP 端点；未设置时使用进程内存储（仅离线调试）
    pub storage_url: Option<String>,
    /// 锚定服务的 HTTP 端点；未设置时使用进程内链
    pub chain_url: Option<String>,
    pub api_key_env: String,
    /// 十六进制 secp256k1 私钥所在环境变量
    pub signing_key_env: String,
    pub encryption_password_env: String,
    pub compression: bool,
    /// SQLite 缓存路径；相对路径基于 app.data_dir
    pub cache_path: PathBuf,
    /// 回溯校验的最大深度
    pub max_traversal_depth: usize,
    /// 后台祖先回填的最大深度
    pub backfill_depth: usize,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            storage_url: None,
            chain_url: None,
            api_key_env: "AUTOBEE_STORAGE_API_KEY".to_string(),
            signing_key_env: "AUTOBEE_AGENT_KEY".to_string(),
            encryption_password_env: "AUTOBEE_ENCRYPTION_PASSWORD".to_string(),
            compression: true,
            cache_path: PathBuf::from("ledger.sqlite"),
            max_traversal_depth: 1000,
            backfill_depth: 200,
        }
    }
}

/// [tools] 段：工具超时与检索条数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub tool_timeout_secs: u64,
    pub search_top_k: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 60,
            search_top_k: 5,
        }
    }
}

/// [memory] 段：记忆检索的嵌入模型
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub embeddings_enabled: bool,
    pub embedding_model: String,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            embeddings_enabled: false,
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

impl AppConfig {
    /// 缓存文件的实际路径
    pub fn cache_path(&self) -> PathBuf {
        if self.ledger.cache_path.is_absolute() {
            self.ledger.cache_path.clone()
        } else {
            self.app.data_dir.join(&self.ledger.cache_path)
        }
    }
}

/// 读取配置中指定名字的环境变量；未设置或为空时返回 None
pub fn secret_from_env(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.trim().is_empty())
}

/// 从 config 目录加载配置，环境变量 AUTOBEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AUTOBEE__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AUTOBEE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pruning_policy() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.workflow.max_history_before_summary, 30);
        assert_eq!(cfg.workflow.max_retained_queue_size, 50);
        assert_eq!(cfg.retry.step_retries, 1);
        assert!(cfg.ledger.storage_url.is_none());
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[workflow]\nmax_steps = 7\n\n[ledger]\ncache_path = \"/tmp/x.sqlite\"\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.workflow.max_steps, 7);
        assert_eq!(cfg.workflow.max_history_before_summary, 30);
        assert_eq!(cfg.cache_path(), PathBuf::from("/tmp/x.sqlite"));
    }

    #[test]
    fn test_relative_cache_path_under_data_dir() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.cache_path(), PathBuf::from("data").join("ledger.sqlite"));
    }
}
