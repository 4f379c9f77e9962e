//! 公平队列：把任意多个流复用到一个 PacketPass 输出上
//!
//! 每个流有一个 64 位虚拟时间，每发完一个包就按 `packet_weight + len`
//! 推进。调度总是挑选虚拟时间最小的排队流，因此长期来看各活跃流
//! 平分输出带宽。刚发完的流记为 `previous`，直到调度 job 运行；
//! 在此之前它立刻重新发送的话沿用自己的时间，不会被拉到当前时间。

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::error::FlowError;
use crate::flow::{PacketPassHandle, PacketPassInterface};
use crate::pending::{Job, PendingGroup};
use crate::structure::{Arena, ArenaKey, Heap, HeapHandle};

/// 虚拟时间上限
pub const FAIR_QUEUE_MAX_TIME: u64 = u64::MAX;

/// 公平队列配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FairQueueConfig {
    /// 每个包在长度之外额外计入的代价，让空包也消耗份额
    pub packet_weight: u64,
}

impl Default for FairQueueConfig {
    fn default() -> Self {
        Self { packet_weight: 1 }
    }
}

type BusyHandler = Box<dyn FnOnce()>;

struct FlowEntry {
    time: u64,
    // 排队时：堆中的位置及待发的包
    queued: Option<(HeapHandle, Vec<u8>)>,
    input: PacketPassHandle,
    busy_handler: Option<BusyHandler>,
}

#[derive(Default)]
struct QueueState {
    flows: Arena<FlowEntry>,
    heap: Heap<u64, ArenaKey>,
    sending: Option<ArenaKey>,
    sending_len: usize,
    previous: Option<ArenaKey>,
}

impl QueueState {
    fn current_time(&self) -> u64 {
        if let Some(key) = self.sending {
            return self.flows.get(key).map_or(0, |f| f.time);
        }
        let first = self.heap.first().map(|(_, time, _)| *time);
        let previous = self
            .previous
            .and_then(|key| self.flows.get(key))
            .map(|f| f.time);
        first.into_iter().chain(previous).min().unwrap_or(0)
    }

    /// 推进刚发完的流的虚拟时间，必要时整体平移以避免溢出
    fn increment_sent_flow(&mut self, key: ArenaKey, amount: u64) {
        let time = self.flows.get(key).map_or(0, |f| f.time);

        if amount > FAIR_QUEUE_MAX_TIME - time {
            let subtract = self.heap.first().map_or(time, |(_, first, _)| *first);
            debug!(time, amount, subtract, "虚拟时间即将溢出，整体平移");

            for (other, flow) in self.flows.iter_mut() {
                if other != key {
                    flow.time = flow.time.saturating_sub(subtract);
                }
            }
            let flows = &self.flows;
            self.heap.map_keys(|t, k| {
                *t = flows.get(*k).map_or(0, |f| f.time);
            });

            // 当前流可能先下溢，加上 amount 后再溢出回正确的值
            if let Some(flow) = self.flows.get_mut(key) {
                flow.time = flow.time.wrapping_sub(subtract);
            }
        }

        if let Some(flow) = self.flows.get_mut(key) {
            flow.time = flow.time.wrapping_add(amount);
        }
    }
}

struct QueueInner {
    output: PacketPassHandle,
    pg: PendingGroup,
    packet_weight: u64,
    use_cancel: Cell<bool>,
    freeing: Cell<bool>,
    state: RefCell<QueueState>,
    schedule_job: Job,
}

/// 公平队列。drop 前所有流都必须已经释放。
pub struct PacketPassFairQueue {
    inner: Rc<QueueInner>,
}

/// 公平队列中的一个流；drop 即释放。
pub struct PacketPassFairQueueFlow {
    queue: Weak<QueueInner>,
    key: ArenaKey,
    input: PacketPassInterface,
}

impl PacketPassFairQueue {
    /// 以 `output` 的发送方身份创建队列
    pub fn new(
        output: PacketPassHandle,
        pg: &PendingGroup,
        config: FairQueueConfig,
    ) -> Result<Self, FlowError> {
        let mtu = output.mtu();
        if config.packet_weight.checked_add(mtu as u64).is_none() {
            return Err(FlowError::WeightOverflow {
                weight: config.packet_weight,
                mtu,
            });
        }

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
                packet_weight: config.packet_weight,
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
        debug!(mtu, packet_weight = config.packet_weight, "创建公平队列");
        Ok(Self { inner })
    }

    /// 允许对忙碌的流调用 [`PacketPassFairQueueFlow::release`]；输出必须支持 cancel。
    pub fn enable_cancel(&self) {
        let q = &self.inner;
        assert!(!q.use_cancel.get(), "fair queue: cancel already enabled");
        assert!(
            q.output.has_cancel(),
            "fair queue: output does not support cancel"
        );
        q.use_cancel.set(true);
    }

    /// 进入拆除状态：此后正在发送的流也可以直接释放，其完成回调不再触发。
    pub fn prepare_free(&self) {
        debug!("公平队列进入拆除状态");
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

impl Drop for PacketPassFairQueue {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            let st = self.inner.state.borrow();
            assert!(st.flows.is_empty(), "fair queue freed with live flows");
            assert!(st.sending.is_none(), "fair queue freed while sending");
        }
        self.inner.schedule_job.unset();
    }
}

impl QueueInner {
    fn input_handler_send(&self, key: ArenaKey, data: Vec<u8>) {
        debug_assert!(!self.freeing.get(), "fair queue: send while freeing");

        let need_dispatch = {
            let mut st = self.state.borrow_mut();
            debug_assert_ne!(st.sending, Some(key));

            let time = if st.previous == Some(key) {
                st.previous = None;
                st.flows.get(key).map_or(0, |f| f.time)
            } else {
                let now = st.current_time();
                st.flows.get(key).map_or(now, |f| f.time.max(now))
            };

            let len = data.len();
            let handle = st.heap.insert(time, key);
            let entry = st.flows.get_mut(key).expect("sending flow is registered");
            debug_assert!(entry.queued.is_none());
            entry.time = time;
            entry.queued = Some((handle, data));
            trace!(flow = key.index(), time, len, "流入队");

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
            let Some((time, key)) = st.heap.pop_first() else {
                return;
            };
            let (_, data) = st
                .flows
                .get_mut(key)
                .and_then(|f| f.queued.take())
                .expect("queued flow holds a packet");
            st.sending = Some(key);
            st.sending_len = data.len();
            debug!(flow = key.index(), time, len = data.len(), "调度流发送");
            data
        };
        self.output.send(data);
    }

    fn output_handler_done(&self) {
        let (key, input, busy_handler) = {
            let mut st = self.state.borrow_mut();
            let Some(key) = st.sending.take() else {
                // 拆除期间流已被释放
                trace!("输出完成时没有发送中的流，忽略");
                return;
            };
            st.previous = Some(key);
            let amount = self.packet_weight + st.sending_len as u64;
            st.increment_sent_flow(key, amount);
            let entry = st.flows.get_mut(key).expect("sending flow is registered");
            trace!(flow = key.index(), time = entry.time, "流发送完成");
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
            let mut st = self.state.borrow_mut();
            st.previous = None;
            !self.freeing.get() && st.sending.is_none() && !st.heap.is_empty()
        };
        if need_dispatch {
            self.dispatch();
        }
    }
}

impl PacketPassFairQueueFlow {
    /// 在队列上创建一个流，输入 MTU 与队列输出相同
    pub fn new(queue: &PacketPassFairQueue) -> Self {
        let q = &queue.inner;
        assert!(!q.freeing.get(), "fair queue: new flow while freeing");

        let key = q.state.borrow_mut().flows.insert(FlowEntry {
            time: 0,
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
        trace!(flow = key.index(), "创建流");

        Self {
            queue: Rc::downgrade(q),
            key,
            input,
        }
    }

    /// 生产者使用的输入接口
    pub fn input(&self) -> PacketPassHandle {
        self.input.handle()
    }

    fn queue(&self) -> Rc<QueueInner> {
        self.queue.upgrade().expect("fair queue freed before its flow")
    }

    /// 输出当前是否正在发送本流的包
    pub fn is_busy(&self) -> bool {
        let q = self.queue();
        assert!(!q.freeing.get(), "fair queue: is_busy while freeing");
        let busy = q.state.borrow().sending == Some(self.key);
        busy
    }

    /// 本流的虚拟时间
    pub fn virtual_time(&self) -> u64 {
        self.queue()
            .state
            .borrow()
            .flows
            .get(self.key)
            .map_or(0, |f| f.time)
    }

    #[cfg(test)]
    pub(crate) fn set_virtual_time(&self, time: u64) {
        let q = self.queue();
        let mut guard = q.state.borrow_mut();
        let st = &mut *guard;
        let Some(f) = st.flows.get_mut(self.key) else {
            return;
        };
        f.time = time;
        if let Some((handle, _)) = f.queued.as_mut() {
            st.heap.remove(*handle);
            *handle = st.heap.insert(time, self.key);
        }
    }

    /// 撤销本流正在发送的包。
    ///
    /// 本流输入上的这个包永远不会完成，流只能随后被释放。
    pub fn release(&self) {
        let q = self.queue();
        assert!(q.use_cancel.get(), "fair queue: cancel not enabled");
        assert!(!q.freeing.get(), "fair queue: release while freeing");
        {
            let mut st = q.state.borrow_mut();
            assert_eq!(st.sending, Some(self.key), "fair queue: release of idle flow");
            assert!(st.previous.is_none());
            st.sending = None;
        }
        debug!(flow = self.key.index(), "撤销流的当前包");
        q.schedule_job.set();
        q.output.cancel();
    }

    /// 请求输出提前完成本流的当前包，完成仍走正常的 done 路径
    pub fn request_cancel(&self) {
        let q = self.queue();
        assert!(!q.freeing.get(), "fair queue: request_cancel while freeing");
        assert_eq!(
            q.state.borrow().sending,
            Some(self.key),
            "fair queue: request_cancel of idle flow"
        );
        debug!(flow = self.key.index(), "请求提前完成当前包");
        q.output.request_cancel();
    }

    /// 设置一次性回调：本流当前包完成时调用，此时可以安全地释放本流
    pub fn set_busy_handler(&self, handler: impl FnOnce() + 'static) {
        let q = self.queue();
        assert!(!q.freeing.get(), "fair queue: set_busy_handler while freeing");
        let mut st = q.state.borrow_mut();
        assert_eq!(st.sending, Some(self.key), "fair queue: busy handler on idle flow");
        if let Some(f) = st.flows.get_mut(self.key) {
            f.busy_handler = Some(Box::new(handler));
        }
    }
}

impl Drop for PacketPassFairQueueFlow {
    fn drop(&mut self) {
        let Some(q) = self.queue.upgrade() else {
            return;
        };
        let removed = {
            let mut st = q.state.borrow_mut();
            if !std::thread::panicking() {
                assert!(
                    q.freeing.get() || st.sending != Some(self.key),
                    "fair queue: busy flow freed outside of teardown"
                );
            }
            if st.sending == Some(self.key) {
                st.sending = None;
            }
            if st.previous == Some(self.key) {
                st.previous = None;
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
