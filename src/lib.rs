//! Clerk - Rust 办公助理智能体
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排引擎、对话历史、后处理、参数修复、请求指标
//! - **intent**: 关键词意图路由（领域收窄、邀请意图、收件人提取）
//! - **llm**: 模型后端抽象与实现（函数调用式 / 聊天补全式 / Mock）
//! - **observability**: tracing 初始化
//! - **policy**: 领域指南摘要（进程内缓存）
//! - **text**: 内容压平、URL 提取、截断等文本工具
//! - **tools**: Provider 抽象、工具目录、过滤与结果归一化

pub mod config;
pub mod core;
pub mod intent;
pub mod llm;
pub mod observability;
pub mod policy;
pub mod text;
pub mod tools;
