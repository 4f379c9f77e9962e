//! Job 调度组
//!
//! 维护当前已挂起（armed）的 job 列表，单线程、协作式地逐个执行。

use std::cell::RefCell;
use std::rc::Rc;

use crate::structure::{Arena, ArenaKey, LinkedList, ListHandle};
use tracing::{debug, trace};

pub(super) type JobHandler = Rc<RefCell<dyn FnMut()>>;

struct JobSlot {
    handler: JobHandler,
    // 挂起时在 armed 列表中的位置
    node: Option<ListHandle>,
}

#[derive(Default)]
struct GroupState {
    jobs: Arena<JobSlot>,
    // 表头 = 最近一次 set 的 job，先执行
    armed: LinkedList<ArenaKey>,
    executed: u64,
    executing: bool,
}

/// Job 调度组：所有需要延迟回调的组件共享同一个组。
///
/// 克隆得到的是同一个组的另一个引用。
#[derive(Clone, Default)]
pub struct PendingGroup {
    inner: Rc<RefCell<GroupState>>,
}

impl PendingGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否有已挂起的 job
    pub fn has_jobs(&self) -> bool {
        !self.inner.borrow().armed.is_empty()
    }

    /// 已注册（无论是否挂起）的 job 数
    pub fn job_count(&self) -> usize {
        self.inner.borrow().jobs.len()
    }

    /// 累计执行过的 job 数
    pub fn executed(&self) -> u64 {
        self.inner.borrow().executed
    }

    /// 执行表头的 job。
    ///
    /// 先把 job 从列表中摘下并标记为未挂起，再调用其处理函数；
    /// 处理函数可以任意 set/unset 包括自身在内的 job。
    pub fn execute_job(&self) {
        let handler = {
            let mut st = self.inner.borrow_mut();
            assert!(!st.executing, "execute_job called from inside a job handler");
            let key = st
                .armed
                .pop_front()
                .expect("execute_job requires an armed job");
            let slot = st.jobs.get_mut(key).expect("armed job is registered");
            slot.node = None;
            let handler = Rc::clone(&slot.handler);
            st.executed += 1;
            st.executing = true;
            trace!(job = key.index(), executed = st.executed, "执行 job");
            handler
        };

        (handler.borrow_mut())();

        self.inner.borrow_mut().executing = false;
    }

    /// 执行 job 直到列表为空，返回执行数量。
    #[tracing::instrument(skip(self))]
    pub fn run(&self) -> u64 {
        let mut count = 0;
        while self.has_jobs() {
            self.execute_job();
            count += 1;
        }
        debug!(jobs = count, "job 列表已清空");
        count
    }

    /// 最多执行 `max_jobs` 个 job，返回实际执行数量。
    pub fn run_limited(&self, max_jobs: u64) -> u64 {
        let mut count = 0;
        while count < max_jobs && self.has_jobs() {
            self.execute_job();
            count += 1;
        }
        count
    }

    pub(super) fn register(&self, handler: JobHandler) -> ArenaKey {
        self.inner
            .borrow_mut()
            .jobs
            .insert(JobSlot { handler, node: None })
    }

    pub(super) fn unregister(&self, key: ArenaKey) {
        let slot = {
            let mut st = self.inner.borrow_mut();
            let slot = st.jobs.remove(key).expect("job is registered");
            if let Some(node) = slot.node {
                st.armed.remove(node);
            }
            slot
        };
        // 处理函数可能持有其他 job，释放时不能占着组的借用
        drop(slot);
    }

    pub(super) fn set(&self, key: ArenaKey) {
        let mut st = self.inner.borrow_mut();
        let old = st.jobs.get_mut(key).expect("job is registered").node.take();
        if let Some(node) = old {
            st.armed.remove(node);
        }
        let node = st.armed.push_front(key);
        st.jobs.get_mut(key).expect("job is registered").node = Some(node);
    }

    pub(super) fn unset(&self, key: ArenaKey) {
        let mut st = self.inner.borrow_mut();
        let old = st.jobs.get_mut(key).expect("job is registered").node.take();
        if let Some(node) = old {
            st.armed.remove(node);
        }
    }

    pub(super) fn is_set(&self, key: ArenaKey) -> bool {
        self.inner
            .borrow()
            .jobs
            .get(key)
            .expect("job is registered")
            .node
            .is_some()
    }
}
