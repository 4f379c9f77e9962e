//! 把 PacketPass 包写进 StreamPass 字节流
//!
//! 输出每次可能只接受一部分，剩余部分重新提交，直到整个包写完
//! 才完成输入。

use std::cell::Cell;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::pending::PendingGroup;

use super::{PacketPassHandle, PacketPassInterface, StreamPassHandle};

struct SenderInner {
    input: PacketPassInterface,
    output: StreamPassHandle,
    // 当前包已写出的字节数
    written: Cell<usize>,
}

pub struct PacketStreamSender {
    inner: Rc<SenderInner>,
}

impl PacketStreamSender {
    pub fn new(output: StreamPassHandle, mtu: usize, pg: &PendingGroup) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<SenderInner>| {
            let w_send = weak.clone();
            let w_done = weak.clone();
            output.sender_init(move |rest, accepted| {
                if let Some(s) = w_done.upgrade() {
                    s.output_handler_done(rest, accepted);
                }
            });
            SenderInner {
                input: PacketPassInterface::new(mtu, pg, move |data| {
                    if let Some(s) = w_send.upgrade() {
                        s.input_handler_send(data);
                    }
                }),
                output: output.clone(),
                written: Cell::new(0),
            }
        });
        Self { inner }
    }

    pub fn input(&self) -> PacketPassHandle {
        self.inner.input.handle()
    }
}

impl SenderInner {
    fn input_handler_send(&self, data: Vec<u8>) {
        self.written.set(0);
        if data.is_empty() {
            self.input.done();
            return;
        }
        self.output.send(data);
    }

    fn output_handler_done(&self, mut rest: Vec<u8>, accepted: usize) {
        self.written.set(self.written.get() + accepted);
        if accepted == rest.len() {
            trace!(written = self.written.get(), "包已完整写入字节流");
            self.input.done();
            return;
        }
        rest.drain(..accepted);
        self.output.send(rest);
    }
}
