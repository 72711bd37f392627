//! # Fleet Runner Library / Fleet Runner 库
//!
//! This library provides the core functionality for the Fleet Runner tool,
//! a configuration-driven unit test orchestrator for multi-repository
//! platforms: it provisions a workspace of git repositories, resolves
//! inter-module dependencies, drives an external build toolchain and runs
//! Node-side and browser-side unit tests with diff-based selection.
//!
//! 此库为 Fleet Runner 工具提供核心功能，
//! 这是一个面向多仓库平台的配置驱动单元测试编排器：
//! 它提供 git 仓库工作区、解析模块间依赖、驱动外部构建工具链，
//! 并运行支持基于 diff 选择的 Node 端和浏览器端单元测试。
//!
//! ## Modules / 模块
//!
//! - `core` - Module map, store manager and test orchestration engine
//! - `infra` - Infrastructure services: command execution, git, ports, logging
//! - `reporting` - XML report handling, console summaries, allowed errors
//! - `cli` - Command-line interface and commands
//!
//! - `core` - 模块映射、仓库存储管理和测试编排引擎
//! - `infra` - 基础设施服务：命令执行、git、端口、日志
//! - `reporting` - XML 报告处理、控制台摘要、已知错误
//! - `cli` - 命令行接口和命令

pub mod cli;
pub mod core;
pub mod infra;
pub mod reporting;

// Re-export commonly used items
pub use crate::core::config;
pub use crate::core::modmap;
pub use crate::core::models;
