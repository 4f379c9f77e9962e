//! 单包缓冲：从 PacketRecv 输入收一个包，再经 PacketPass 输出发出去

use std::rc::{Rc, Weak};

use crate::error::FlowError;

use super::{PacketPassHandle, PacketRecvHandle};

struct BufferInner {
    input: PacketRecvHandle,
    output: PacketPassHandle,
}

pub struct SinglePacketBuffer {
    inner: Rc<BufferInner>,
}

impl SinglePacketBuffer {
    /// 以 `input` 的接收方、`output` 的发送方身份创建，并立即开始接收
    pub fn new(input: PacketRecvHandle, output: PacketPassHandle) -> Result<Self, FlowError> {
        if output.mtu() < input.mtu() {
            return Err(FlowError::MtuMismatch {
                input: input.mtu(),
                output: output.mtu(),
            });
        }

        let inner = Rc::new_cyclic(|weak: &Weak<BufferInner>| {
            let w_in = weak.clone();
            let w_out = weak.clone();
            input.receiver_init(move |data| {
                if let Some(b) = w_in.upgrade() {
                    b.output.send(data);
                }
            });
            output.sender_init(move || {
                if let Some(b) = w_out.upgrade() {
                    b.start_recv();
                }
            });
            BufferInner {
                input: input.clone(),
                output: output.clone(),
            }
        });
        inner.start_recv();
        Ok(Self { inner })
    }

    pub fn mtu(&self) -> usize {
        self.inner.input.mtu()
    }
}

impl BufferInner {
    fn start_recv(&self) {
        self.input.recv(Vec::with_capacity(self.input.mtu()));
    }
}
