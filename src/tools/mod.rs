//! 工具层：Provider 抽象、目录、过滤与结果归一化

pub mod catalog;
pub mod echo;
pub mod filter;
pub mod normalize;
pub mod provider;

pub use catalog::ToolCatalog;
pub use echo::EchoProvider;
pub use filter::filter_descriptors;
pub use normalize::{looks_like_error_text, normalize, ToolResult};
pub use provider::{ToolDescriptor, ToolProvider};
