//! 触发器抑制作用域
//!
//! 批量操作期间关闭逐条编辑触发的副作用。作用域由守卫对象持有，
//! 离开作用域时（包括提前返回与出错）计数减一。多个作用域可以交叠，
//! 全部结束后才恢复。清单级作用域只影响对应清单。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct TriggerContext {
    updating: AtomicUsize,
    removing: AtomicUsize,
    activity_stream_disabled: AtomicUsize,
    inventories: Mutex<HashMap<i64, usize>>,
}

enum Scope<'a> {
    Global(&'a AtomicUsize),
    Inventory(&'a Mutex<HashMap<i64, usize>>, i64),
}

#[must_use = "守卫被丢弃时作用域立即结束"]
pub struct TriggerGuard<'a> {
    scope: Scope<'a>,
}

impl Drop for TriggerGuard<'_> {
    fn drop(&mut self) {
        match self.scope {
            Scope::Global(depth) => {
                depth.fetch_sub(1, Ordering::SeqCst);
            }
            Scope::Inventory(map, inventory_id) => {
                let mut map = map.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some(depth) = map.get_mut(&inventory_id) {
                    *depth -= 1;
                    if *depth == 0 {
                        map.remove(&inventory_id);
                    }
                }
            }
        }
    }
}

fn enter(depth: &AtomicUsize) -> TriggerGuard<'_> {
    depth.fetch_add(1, Ordering::SeqCst);
    TriggerGuard {
        scope: Scope::Global(depth),
    }
}

impl TriggerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 抑制所有清单派生字段的自动重算
    pub fn updating(&self) -> TriggerGuard<'_> {
        enter(&self.updating)
    }

    /// 递归停用期间抑制逐条触发
    pub fn removing(&self) -> TriggerGuard<'_> {
        enter(&self.removing)
    }

    /// 只抑制指定清单的自动重算
    pub fn updating_inventory(&self, inventory_id: i64) -> TriggerGuard<'_> {
        let mut map = self
            .inventories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *map.entry(inventory_id).or_insert(0) += 1;
        TriggerGuard {
            scope: Scope::Inventory(&self.inventories, inventory_id),
        }
    }

    pub fn disable_activity_stream(&self) -> TriggerGuard<'_> {
        enter(&self.activity_stream_disabled)
    }

    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::SeqCst) > 0
    }

    pub fn is_removing(&self) -> bool {
        self.removing.load(Ordering::SeqCst) > 0
    }

    /// 编辑后是否应立即重算派生字段
    pub fn recompute_enabled(&self) -> bool {
        !self.is_updating() && !self.is_removing()
    }

    /// 编辑指定清单后是否应立即重算
    pub fn recompute_enabled_for(&self, inventory_id: i64) -> bool {
        self.recompute_enabled()
            && !self
                .inventories
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .contains_key(&inventory_id)
    }

    pub fn activity_stream_enabled(&self) -> bool {
        self.activity_stream_disabled.load(Ordering::SeqCst) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_guard_restores_on_drop() {
        let ctx = TriggerContext::new();
        assert!(ctx.recompute_enabled());
        {
            let _guard = ctx.updating();
            assert!(ctx.is_updating());
            assert!(!ctx.recompute_enabled());
        }
        assert!(!ctx.is_updating());
    }

    #[test]
    fn test_nested_scopes_restore_previous_value() {
        let ctx = TriggerContext::new();
        let outer = ctx.updating();
        {
            let _inner = ctx.updating();
        }
        assert!(ctx.is_updating());
        drop(outer);
        assert!(!ctx.is_updating());
    }

    #[test]
    fn test_overlapping_scopes_dropped_out_of_order() {
        let ctx = TriggerContext::new();
        let a = ctx.updating();
        let b = ctx.updating();
        drop(a);
        assert!(!ctx.recompute_enabled());
        drop(b);
        assert!(ctx.recompute_enabled());
    }

    #[test]
    fn test_concurrent_scopes_all_released() {
        let ctx = Arc::new(TriggerContext::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let _global = ctx.updating();
                        let _inventory = ctx.updating_inventory(i % 3);
                        std::thread::yield_now();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(ctx.recompute_enabled());
        for inventory_id in 0..3 {
            assert!(ctx.recompute_enabled_for(inventory_id));
        }
    }

    #[test]
    fn test_inventory_scope_leaves_other_inventories_alone() {
        let ctx = TriggerContext::new();
        let first = ctx.updating_inventory(1);
        let second = ctx.updating_inventory(1);
        assert!(!ctx.recompute_enabled_for(1));
        assert!(ctx.recompute_enabled_for(2));
        assert!(ctx.recompute_enabled());

        drop(first);
        assert!(!ctx.recompute_enabled_for(1));
        drop(second);
        assert!(ctx.recompute_enabled_for(1));
    }

    #[test]
    fn test_restores_on_early_return() {
        fn failing(ctx: &TriggerContext) -> Result<(), ()> {
            let _guard = ctx.disable_activity_stream();
            Err(())
        }

        let ctx = TriggerContext::new();
        assert!(failing(&ctx).is_err());
        assert!(ctx.activity_stream_enabled());
    }

    #[test]
    fn test_removing_suppresses_recompute() {
        let ctx = TriggerContext::new();
        let _guard = ctx.removing();
        assert!(ctx.is_removing());
        assert!(!ctx.recompute_enabled());
        assert!(!ctx.recompute_enabled_for(5));
    }
}
