//! 工具模块

pub mod address;
pub mod conflux_address;
pub mod units;
