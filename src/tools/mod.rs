//! 工具层：注册表与参数校验、带超时与审计日志的执行器、内置工具

pub mod executor;
pub mod registry;
pub mod save_experience;
pub mod schema;
pub mod search_memory;
pub mod time;

pub use executor::ToolExecutor;
pub use registry::{validate_args, Tool, ToolRegistry};
pub use save_experience::SaveExperienceTool;
pub use schema::{decision_schema_json, parameters_schema};
pub use search_memory::SearchMemoryTool;
pub use time::CurrentTimeTool;
