//! 可热插拔输入的 PacketRecv 转接层
//!
//! 输出一直存在；输入可以随时接上或断开。输出在等包时接上新输入会立即
//! 向新输入请求；旧输入迟到的完成回调被忽略。

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::error::FlowError;
use crate::pending::PendingGroup;

use super::{PacketRecvHandle, PacketRecvInterface};

#[derive(Default)]
struct ConnState {
    input: Option<PacketRecvHandle>,
    // 输出正在等一个包
    want: bool,
    // 还没交给输入的缓冲区
    spare: Option<Vec<u8>>,
    in_busy: bool,
    generation: u64,
}

struct ConnInner {
    output: PacketRecvInterface,
    state: RefCell<ConnState>,
}

pub struct PacketRecvConnector {
    inner: Rc<ConnInner>,
}

impl PacketRecvConnector {
    pub fn new(mtu: usize, pg: &PendingGroup) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ConnInner>| {
            let w = weak.clone();
            ConnInner {
                output: PacketRecvInterface::new(mtu, pg, move |buf| {
                    if let Some(c) = w.upgrade() {
                        c.output_handler_recv(buf);
                    }
                }),
                state: RefCell::new(ConnState::default()),
            }
        });
        Self { inner }
    }

    pub fn output(&self) -> PacketRecvHandle {
        self.inner.output.handle()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().input.is_some()
    }

    /// 接上输入；输入 MTU 不能大于输出 MTU
    pub fn connect_input(&self, input: PacketRecvHandle) -> Result<(), FlowError> {
        let c = &self.inner;
        let mtu = c.output.mtu();
        assert!(!self.is_connected(), "connector: input already connected");
        if input.mtu() > mtu {
            return Err(FlowError::MtuMismatch {
                input: input.mtu(),
                output: mtu,
            });
        }

        let generation = {
            let mut st = c.state.borrow_mut();
            st.generation += 1;
            st.generation
        };
        let weak = Rc::downgrade(c);
        input.receiver_init(move |data| {
            if let Some(c) = weak.upgrade() {
                c.input_handler_done(generation, data);
            }
        });

        let request = {
            let mut st = c.state.borrow_mut();
            st.input = Some(input.clone());
            st.in_busy = st.want;
            if st.want {
                Some(st.spare.take().unwrap_or_else(|| Vec::with_capacity(mtu)))
            } else {
                None
            }
        };
        debug!(generation, request = request.is_some(), "连接输入");
        if let Some(buf) = request {
            input.recv(buf);
        }
        Ok(())
    }

    /// 断开输入；调用方随后可以释放旧输入
    pub fn disconnect_input(&self) {
        let mut st = self.inner.state.borrow_mut();
        assert!(st.input.is_some(), "connector: no input connected");
        st.input = None;
        st.in_busy = false;
        st.generation += 1;
        debug!(want = st.want, "断开输入");
    }
}

impl ConnInner {
    fn output_handler_recv(&self, buf: Vec<u8>) {
        let input = {
            let mut st = self.state.borrow_mut();
            debug_assert!(!st.want);
            st.want = true;
            st.in_busy = st.input.is_some();
            st.input.clone()
        };
        match input {
            Some(input) => input.recv(buf),
            None => self.state.borrow_mut().spare = Some(buf),
        }
    }

    fn input_handler_done(&self, generation: u64, data: Vec<u8>) {
        {
            let mut st = self.state.borrow_mut();
            if st.generation != generation || !st.in_busy {
                trace!(generation, "忽略旧输入的完成回调");
                return;
            }
            st.in_busy = false;
            st.want = false;
        }
        self.output.done(data);
    }
}
