//! 可执行文件探测缓存：同一个工具名只探测一次，直到 `clear()`

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

type Probe = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub struct AvailabilityCache {
    entries: Mutex<HashMap<String, bool>>,
    probe: Probe,
}

impl Default for AvailabilityCache {
    fn default() -> Self {
        Self::with_probe(|name| which::which(name).is_ok())
    }
}

impl std::fmt::Debug for AvailabilityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityCache")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl AvailabilityCache {
    /// 使用 `$PATH` 查找的默认缓存
    pub fn new() -> Self {
        Self::default()
    }

    /// 自定义探测函数，测试中用来替换 `$PATH` 查找
    pub fn with_probe(probe: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            probe: Arc::new(probe),
        }
    }

    /// 查询工具是否可用。探测过程中的任何异常都视为不可用。
    ///
    /// 探测在持锁状态下进行，保证同一个名字不会被并发重复探测。
    pub fn is_available(&self, name: &str) -> bool {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(&known) = entries.get(name) {
            return known;
        }

        let probe = &self.probe;
        let found = catch_unwind(AssertUnwindSafe(|| probe(name))).unwrap_or_else(|_| {
            log::warn!("探测 {} 时发生异常，按不可用处理", name);
            false
        });
        log::debug!("探测 {}: {}", name, if found { "可用" } else { "不可用" });
        entries.insert(name.to_string(), found);
        found
    }

    /// 返回第一个可用的工具名
    pub fn first_available<'a>(&self, names: &[&'a str]) -> Option<&'a str> {
        names.iter().copied().find(|name| self.is_available(name))
    }

    #[allow(dead_code)]
    pub fn clear(&self) {
        match self.entries.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}
