//! Job：可反复挂起的延迟回调
//!
//! 与一次性事件不同，job 注册一次后可以多次 set/unset；
//! drop 时自动从调度组中摘除。

use std::cell::RefCell;
use std::rc::Rc;

use super::group::{JobHandler, PendingGroup};
use crate::structure::ArenaKey;

/// 注册在 [`PendingGroup`] 上的延迟回调。
pub struct Job {
    group: PendingGroup,
    key: ArenaKey,
}

impl Job {
    /// 注册一个 job（初始为未挂起）
    pub fn new(group: &PendingGroup, handler: impl FnMut() + 'static) -> Self {
        let handler: JobHandler = Rc::new(RefCell::new(handler));
        let key = group.register(handler);
        Self {
            group: group.clone(),
            key,
        }
    }

    /// 挂起：若已挂起则先摘下，再插到列表头部（后挂起的先执行）
    pub fn set(&self) {
        self.group.set(self.key);
    }

    /// 取消挂起；未挂起时无操作
    pub fn unset(&self) {
        self.group.unset(self.key);
    }

    pub fn is_set(&self) -> bool {
        self.group.is_set(self.key)
    }

    pub fn group(&self) -> &PendingGroup {
        &self.group
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        self.group.unregister(self.key);
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("key", &self.key.index())
            .finish()
    }
}
