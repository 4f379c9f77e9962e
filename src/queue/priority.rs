//! 优先级队列：按流创建时给定的静态优先级调度
//!
//! 数值越小越先发送；同优先级按入堆顺序。没有虚拟时间，也没有
//! “上一个流”的概念。

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::flow::{PacketPassHandle, PacketPassInterface};
use crate::pending::{Job, PendingGroup};
use crate::structure::{Arena, ArenaKey, Heap, HeapHandle};

struct FlowEntry {
    priority: i32,
    queued: Option<(HeapHandle, Vec<u8>)>,
    input: PacketPassHandle,
    busy_handler: Option<Box<dyn FnOnce()>>,
}

#[derive(Default)]
struct QueueState {
    flows: Arena<FlowEntry>,
    heap: Heap<i32, ArenaKey>,
    sending: Option<ArenaKey>,
}

struct QueueInner {
    output: PacketPassHandle,
    pg: PendingGroup,
    use_cancel: Cell<bool>,
    freeing: Cell<bool>,
    state: RefCell<QueueState>,
    schedule_job: Job,
}

pub struct PacketPassPriorityQueue {
    inner: Rc<QueueInner>,
}

pub struct PacketPassPriorityQueueFlow {
    queue: Weak<QueueInner>,
    key: ArenaKey,
    input: PacketPassInterface,
}

impl PacketPassPriorityQueue {
    pub fn new(output: PacketPassHandle, pg: &PendingGroup) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<QueueInner>| {
            let w_job = weak.clone();
            let w_done = weak.clone();
            output.sender_init(move || {
                if let Some(q) = w_done.upgrade() {
                    q.output_handler_done();
                }
            });
            QueueInner {
                output: output.clone(),
                pg: pg.clone(),
                use_cancel: Cell::new(false),
                freeing: Cell::new(false),
                state: RefCell::new(QueueState::default()),
                schedule_job: Job::new(pg, move || {
                    if let Some(q) = w_job.upgrade() {
                        q.schedule_job_handler();
                    }
                }),
            }
        });
        debug!(mtu = output.mtu(), "创建优先级队列");
        Self { inner }
    }

    pub fn enable_cancel(&self) {
        let q = &self.inner;
        assert!(!q.use_cancel.get(), "priority queue: cancel already enabled");
        assert!(
            q.output.has_cancel(),
            "priority queue: output does not support cancel"
        );
        q.use_cancel.set(true);
    }

    pub fn prepare_free(&self) {
        debug!("优先级队列进入拆除状态");
        self.inner.freeing.set(true);
    }

    pub fn is_freeing(&self) -> bool {
        self.inner.freeing.get()
    }

    pub fn mtu(&self) -> usize {
        self.inner.output.mtu()
    }

    pub fn flow_count(&self) -> usize {
        self.inner.state.borrow().flows.len()
    }
}

impl Drop for PacketPassPriorityQueue {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            let st = self.inner.state.borrow();
            assert!(st.flows.is_empty(), "priority queue freed with live flows");
            assert!(st.sending.is_none(), "priority queue freed while sending");
        }
        self.inner.schedule_job.unset();
    }
}

impl QueueInner {
    fn input_handler_send(&self, key: ArenaKey, data: Vec<u8>) {
        debug_assert!(!self.freeing.get(), "priority queue: send while freeing");

        let need_dispatch = {
            let mut st = self.state.borrow_mut();
            debug_assert_ne!(st.sending, Some(key));
            let priority = st
                .flows
                .get(key)
                .map(|f| f.priority)
                .expect("sending flow is registered");
            let handle = st.heap.insert(priority, key);
            if let Some(entry) = st.flows.get_mut(key) {
                debug_assert!(entry.queued.is_none());
                trace!(flow = key.index(), priority, len = data.len(), "流入队");
                entry.queued = Some((handle, data));
            }
            st.sending.is_none() && !self.schedule_job.is_set()
        };

        if need_dispatch {
            self.dispatch();
        }
    }

    fn dispatch(&self) {
        let data = {
            let mut st = self.state.borrow_mut();
            debug_assert!(st.sending.is_none());
            let Some((priority, key)) = st.heap.pop_first() else {
                return;
            };
            let (_, data) = st
                .flows
                .get_mut(key)
                .and_then(|f| f.queued.take())
                .expect("queued flow holds a packet");
            st.sending = Some(key);
            debug!(flow = key.index(), priority, len = data.len(), "调度流发送");
            data
        };
        self.output.send(data);
    }

    fn output_handler_done(&self) {
        let (key, input, busy_handler) = {
            let mut st = self.state.borrow_mut();
            let Some(key) = st.sending.take() else {
                trace!("输出完成时没有发送中的流，忽略");
                return;
            };
            let entry = st.flows.get_mut(key).expect("sending flow is registered");
            (key, entry.input.clone(), entry.busy_handler.take())
        };

        self.schedule_job.set();
        input.done();

        if let Some(handler) = busy_handler {
            trace!(flow = key.index(), "调用 busy 回调");
            handler();
        }
    }

    fn schedule_job_handler(&self) {
        let need_dispatch = {
            let st = self.state.borrow();
            !self.freeing.get() && st.sending.is_none() && !st.heap.is_empty()
        };
        if need_dispatch {
            self.dispatch();
        }
    }
}

impl PacketPassPriorityQueueFlow {
    pub fn new(queue: &PacketPassPriorityQueue, priority: i32) -> Self {
        let q = &queue.inner;
        assert!(!q.freeing.get(), "priority queue: new flow while freeing");

        let key = q.state.borrow_mut().flows.insert(FlowEntry {
            priority,
            queued: None,
            input: PacketPassHandle::dangling(),
            busy_handler: None,
        });

        let weak = Rc::downgrade(q);
        let input = PacketPassInterface::new(q.output.mtu(), &q.pg, move |data| {
            if let Some(q) = weak.upgrade() {
                q.input_handler_send(key, data);
            }
        });
        if let Some(entry) = q.state.borrow_mut().flows.get_mut(key) {
            entry.input = input.handle();
        }
        trace!(flow = key.index(), priority, "创建流");

        Self {
            queue: Rc::downgrade(q),
            key,
            input,
        }
    }

    pub fn input(&self) -> PacketPassHandle {
        self.input.handle()
    }

    pub fn priority(&self) -> i32 {
        self.queue()
            .state
            .borrow()
            .flows
            .get(self.key)
            .map_or(0, |f| f.priority)
    }

    fn queue(&self) -> Rc<QueueInner> {
        self.queue
            .upgrade()
            .expect("priority queue freed before its flow")
    }

    pub fn is_busy(&self) -> bool {
        let q = self.queue();
        assert!(!q.freeing.get(), "priority queue: is_busy while freeing");
        let busy = q.state.borrow().sending == Some(self.key);
        busy
    }

    /// 撤销本流正在发送的包；该包在本流输入上永远不会完成
    pub fn release(&self) {
        let q = self.queue();
        assert!(q.use_cancel.get(), "priority queue: cancel not enabled");
        assert!(!q.freeing.get(), "priority queue: release while freeing");
        {
            let mut st = q.state.borrow_mut();
            assert_eq!(
                st.sending,
                Some(self.key),
                "priority queue: release of idle flow"
            );
            st.sending = None;
        }
        debug!(flow = self.key.index(), "撤销流的当前包");
        q.schedule_job.set();
        q.output.cancel();
    }

    /// 请求输出提前完成当前包；完成后照常触发本流的 done 与 busy 回调
    pub fn request_cancel(&self) {
        let q = self.queue();
        assert!(!q.freeing.get(), "priority queue: request_cancel while freeing");
        assert_eq!(
            q.state.borrow().sending,
            Some(self.key),
            "priority queue: request_cancel of idle flow"
        );
        debug!(flow = self.key.index(), "请求提前完成当前包");
        q.output.request_cancel();
    }

    pub fn set_busy_handler(&self, handler: impl FnOnce() + 'static) {
        let q = self.queue();
        assert!(
            !q.freeing.get(),
            "priority queue: set_busy_handler while freeing"
        );
        let mut st = q.state.borrow_mut();
        assert_eq!(
            st.sending,
            Some(self.key),
            "priority queue: busy handler on idle flow"
        );
        if let Some(f) = st.flows.get_mut(self.key) {
            f.busy_handler = Some(Box::new(handler));
        }
    }
}

impl Drop for PacketPassPriorityQueueFlow {
    fn drop(&mut self) {
        let Some(q) = self.queue.upgrade() else {
            return;
        };
        let removed = {
            let mut st = q.state.borrow_mut();
            if !std::thread::panicking() {
                assert!(
                    q.freeing.get() || st.sending != Some(self.key),
                    "priority queue: busy flow freed outside of teardown"
                );
            }
            if st.sending == Some(self.key) {
                st.sending = None;
            }
            let entry = st.flows.remove(self.key);
            if let Some((handle, _)) = entry.as_ref().and_then(|e| e.queued.as_ref()) {
                st.heap.remove(*handle);
            }
            entry
        };
        trace!(flow = self.key.index(), "释放流");
        drop(removed);
    }
}
