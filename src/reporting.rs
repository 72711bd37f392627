//! # Reporting Module / 报告模块
//!
//! This module handles test report handling in multiple formats: XML report
//! rewriting and synthesis, colorful console summaries, and the persisted
//! allowed-errors set.
//!
//! 此模块处理多种格式的测试报告：XML 报告重写与合成、
//! 彩色控制台摘要以及持久化的已知错误集合。

pub mod allowlist;
pub mod console;
pub mod junit;

// Re-export common reporting functions
pub use console::{print_failure_details, print_summary};
pub use junit::TestReport;
