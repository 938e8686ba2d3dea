//! 硬件钱包注册表
//!
//! 以 (type 小写, hardwareId) 为键。启动时注册，之后只读。

use std::{collections::HashMap, sync::Arc};

use serde::Serialize;

use super::{HardwareCapabilities, HardwareWallet};
use crate::error::{CoreError, CoreResult};

type RegistryKey = (String, Option<String>);

/// 注册项快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardwareAdapterEntry {
    pub hardware_type: String,
    pub hardware_id: Option<String>,
    pub capabilities: HardwareCapabilities,
}

#[derive(Default)]
pub struct HardwareWalletRegistry {
    adapters: HashMap<RegistryKey, Arc<dyn HardwareWallet>>,
    /// 注册顺序，list 按此输出
    order: Vec<RegistryKey>,
}

impl HardwareWalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(hardware_type: &str, hardware_id: Option<&str>) -> RegistryKey {
        (
            hardware_type.trim().to_lowercase(),
            hardware_id.map(str::to_string),
        )
    }

    /// 注册适配器，同一 (type, hardwareId) 只能注册一次
    pub fn register(
        &mut self,
        hardware_type: &str,
        hardware_id: Option<&str>,
        adapter: Arc<dyn HardwareWallet>,
    ) -> CoreResult<()> {
        let key = Self::key(hardware_type, hardware_id);
        if self.adapters.contains_key(&key) {
            return Err(CoreError::DuplicateHardwareAdapter {
                hardware_type: hardware_type.to_string(),
                hardware_id: hardware_id.unwrap_or("<default>").to_string(),
            });
        }

        tracing::info!(
            hardware_type = %key.0,
            hardware_id = ?key.1,
            "Hardware wallet adapter registered"
        );
        self.order.push(key.clone());
        self.adapters.insert(key, adapter);
        Ok(())
    }

    /// 精确匹配设备；没有时退回到不绑定设备的注册项
    pub fn get(&self, hardware_type: &str, hardware_id: Option<&str>) -> Option<Arc<dyn HardwareWallet>> {
        let key = Self::key(hardware_type, hardware_id);
        if let Some(adapter) = self.adapters.get(&key) {
            return Some(adapter.clone());
        }
        if hardware_id.is_some() {
            return self.adapters.get(&(key.0, None)).cloned();
        }
        None
    }

    pub fn has(&self, hardware_type: &str, hardware_id: Option<&str>) -> bool {
        self.get(hardware_type, hardware_id).is_some()
    }

    /// 按注册顺序返回快照，能力实时从适配器读取
    pub fn list(&self) -> Vec<HardwareAdapterEntry> {
        self.order
            .iter()
            .filter_map(|key| {
                self.adapters.get(key).map(|adapter| HardwareAdapterEntry {
                    hardware_type: key.0.clone(),
                    hardware_id: key.1.clone(),
                    capabilities: adapter.capabilities(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
