//! 基础设施层：日志、JSON-RPC 通道、事件总线

pub mod event_bus;
pub mod logging;
pub mod rpc;
pub mod rpc_validator;
