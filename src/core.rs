//! # Core Module / 核心模块
//!
//! This module contains the core functionality of Fleet Runner,
//! including the module map, the store manager and the test orchestrator.
//!
//! 此模块包含 Fleet Runner 的核心功能，
//! 包括模块映射、仓库存储管理和测试编排器。

pub mod config;
pub mod manifest;
pub mod models;
pub mod modmap;
pub mod service;
pub mod store;
pub mod tester;

// Re-exports
pub use config::FleetConfig;
pub use modmap::ModuleMap;
pub use store::StoreManager;
pub use tester::TestOrchestrator;
