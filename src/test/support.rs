use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::flow::{PacketPassHandle, PacketPassInterface};
use crate::pending::PendingGroup;

/// 定速接收方：收到的包先留在手里，直到测试调用 `finish`
pub(super) struct PacedSink {
    pub iface: PacketPassInterface,
    held: Rc<RefCell<Option<Vec<u8>>>>,
    cancelled: Rc<Cell<u32>>,
}

impl PacedSink {
    pub fn new(mtu: usize, pg: &PendingGroup) -> Self {
        let held: Rc<RefCell<Option<Vec<u8>>>> = Rc::new(RefCell::new(None));
        let h = held.clone();
        let iface = PacketPassInterface::new(mtu, pg, move |data| {
            *h.borrow_mut() = Some(data);
        });
        Self {
            iface,
            held,
            cancelled: Rc::new(Cell::new(0)),
        }
    }

    pub fn with_cancel(mtu: usize, pg: &PendingGroup) -> Self {
        let sink = Self::new(mtu, pg);
        let held = sink.held.clone();
        let cancelled = sink.cancelled.clone();
        sink.iface.enable_cancel(move || {
            held.borrow_mut().take();
            cancelled.set(cancelled.get() + 1);
        });
        sink
    }

    pub fn handle(&self) -> PacketPassHandle {
        self.iface.handle()
    }

    pub fn holding(&self) -> Option<Vec<u8>> {
        self.held.borrow().clone()
    }

    pub fn cancelled(&self) -> u32 {
        self.cancelled.get()
    }

    /// 完成手上的包并返回它
    pub fn finish(&self) -> Vec<u8> {
        let pkt = self.held.borrow_mut().take().expect("sink holds a packet");
        self.iface.done();
        pkt
    }
}

/// 生产者：依次发送预先给定的包，每个包完成后再发下一个
pub(super) struct Producer {
    input: PacketPassHandle,
    pending: Rc<RefCell<VecDeque<Vec<u8>>>>,
    done: Rc<Cell<u32>>,
}

impl Producer {
    pub fn new(input: PacketPassHandle, packets: Vec<Vec<u8>>) -> Self {
        let pending = Rc::new(RefCell::new(VecDeque::from(packets)));
        let done = Rc::new(Cell::new(0));
        {
            let pending = pending.clone();
            let done = done.clone();
            let input_w = input.clone();
            input.sender_init(move || {
                done.set(done.get() + 1);
                let next = pending.borrow_mut().pop_front();
                if let Some(pkt) = next {
                    input_w.send(pkt);
                }
            });
        }
        Self {
            input,
            pending,
            done,
        }
    }

    /// `count` 个全部填充为 `tag` 的 `len` 字节包
    pub fn tagged(input: PacketPassHandle, tag: u8, len: usize, count: usize) -> Self {
        Self::new(input, vec![vec![tag; len]; count])
    }

    pub fn start(&self) {
        let first = self.pending.borrow_mut().pop_front();
        if let Some(pkt) = first {
            self.input.send(pkt);
        }
    }

    pub fn done_count(&self) -> u32 {
        self.done.get()
    }
}

/// 反复“跑空 job，完成一个包”，返回依次完成的包的首字节
pub(super) fn drain_tags(pg: &PendingGroup, sink: &PacedSink, max: usize) -> Vec<u8> {
    let mut tags = Vec::new();
    for _ in 0..max {
        pg.run();
        if sink.holding().is_none() {
            break;
        }
        let pkt = sink.finish();
        tags.push(pkt.first().copied().unwrap_or(0));
    }
    pg.run();
    tags
}
