//! 多包缓冲：PacketRecv 输入到 PacketPass 输出之间的 FIFO
//!
//! 最多同时持有 `capacity` 个包（包括正在输出上发送的那个）；
//! 满了就暂停接收，直到输出完成一个包。

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::error::FlowError;

use super::{PacketPassHandle, PacketRecvHandle};

#[derive(Debug, Default)]
struct BufferState {
    q: VecDeque<Vec<u8>>,
    cur_bytes: usize,
    sending_len: Option<usize>,
    receiving: bool,
}

impl BufferState {
    fn held(&self) -> usize {
        self.q.len() + usize::from(self.sending_len.is_some())
    }
}

struct BufferInner {
    input: PacketRecvHandle,
    output: PacketPassHandle,
    capacity: usize,
    state: RefCell<BufferState>,
}

pub struct PacketBuffer {
    inner: Rc<BufferInner>,
}

impl PacketBuffer {
    pub fn new(
        input: PacketRecvHandle,
        output: PacketPassHandle,
        capacity: usize,
    ) -> Result<Self, FlowError> {
        if capacity == 0 {
            return Err(FlowError::ZeroCapacity);
        }
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
                    b.input_handler_done(data);
                }
            });
            output.sender_init(move || {
                if let Some(b) = w_out.upgrade() {
                    b.output_handler_done();
                }
            });
            BufferInner {
                input: input.clone(),
                output: output.clone(),
                capacity,
                state: RefCell::new(BufferState::default()),
            }
        });
        inner.state.borrow_mut().receiving = true;
        inner.input.recv(Vec::with_capacity(inner.input.mtu()));
        Ok(Self { inner })
    }

    /// 当前持有的包数
    pub fn len(&self) -> usize {
        self.inner.state.borrow().held()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前持有的字节数
    pub fn bytes(&self) -> usize {
        self.inner.state.borrow().cur_bytes
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl BufferInner {
    fn input_handler_done(&self, data: Vec<u8>) {
        let (send, recv) = {
            let mut st = self.state.borrow_mut();
            st.receiving = false;
            st.cur_bytes += data.len();
            st.q.push_back(data);
            let send = self.take_next(&mut st);
            let recv = self.want_recv(&mut st);
            trace!(held = st.held(), "缓冲收到一个包");
            (send, recv)
        };
        self.kick(send, recv);
    }

    fn output_handler_done(&self) {
        let (send, recv) = {
            let mut st = self.state.borrow_mut();
            if let Some(len) = st.sending_len.take() {
                st.cur_bytes -= len;
            }
            let send = self.take_next(&mut st);
            let recv = self.want_recv(&mut st);
            (send, recv)
        };
        self.kick(send, recv);
    }

    fn take_next(&self, st: &mut BufferState) -> Option<Vec<u8>> {
        if st.sending_len.is_some() {
            return None;
        }
        let data = st.q.pop_front()?;
        st.sending_len = Some(data.len());
        Some(data)
    }

    fn want_recv(&self, st: &mut BufferState) -> bool {
        if st.receiving || st.held() >= self.capacity {
            return false;
        }
        st.receiving = true;
        true
    }

    fn kick(&self, send: Option<Vec<u8>>, recv: bool) {
        if let Some(data) = send {
            self.output.send(data);
        }
        if recv {
            self.input.recv(Vec::with_capacity(self.input.mtu()));
        }
    }
}
