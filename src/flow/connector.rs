//! 可热插拔输出的 PacketPass 转接层
//!
//! 输入一直存在；输出可以随时接上或断开。断开时还在输出上处理的包
//! 会在下一个输出接上后重新发送，旧输出之后的完成回调被忽略。

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::error::FlowError;
use crate::pending::PendingGroup;

use super::{PacketPassHandle, PacketPassInterface};

#[derive(Default)]
struct ConnState {
    // 输入上尚未完成的包；交给输出的是它的副本
    packet: Option<Vec<u8>>,
    output: Option<PacketPassHandle>,
    out_busy: bool,
    generation: u64,
}

struct ConnInner {
    input: PacketPassInterface,
    state: RefCell<ConnState>,
}

pub struct PacketPassConnector {
    inner: Rc<ConnInner>,
}

impl PacketPassConnector {
    pub fn new(mtu: usize, pg: &PendingGroup) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ConnInner>| {
            let w = weak.clone();
            ConnInner {
                input: PacketPassInterface::new(mtu, pg, move |data| {
                    if let Some(c) = w.upgrade() {
                        c.input_handler_send(data);
                    }
                }),
                state: RefCell::new(ConnState::default()),
            }
        });
        Self { inner }
    }

    pub fn input(&self) -> PacketPassHandle {
        self.inner.input.handle()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().output.is_some()
    }

    /// 接上输出；输出 MTU 不能小于输入 MTU
    pub fn connect_output(&self, output: PacketPassHandle) -> Result<(), FlowError> {
        let c = &self.inner;
        let mtu = c.input.mtu();
        assert!(!self.is_connected(), "connector: output already connected");
        if output.mtu() < mtu {
            return Err(FlowError::MtuMismatch {
                input: mtu,
                output: output.mtu(),
            });
        }

        let generation = {
            let mut st = c.state.borrow_mut();
            st.generation += 1;
            st.generation
        };
        let weak = Rc::downgrade(c);
        output.sender_init(move || {
            if let Some(c) = weak.upgrade() {
                c.output_handler_done(generation);
            }
        });

        let resend = {
            let mut st = c.state.borrow_mut();
            st.output = Some(output.clone());
            st.out_busy = st.packet.is_some();
            st.packet.clone()
        };
        debug!(generation, resend = resend.is_some(), "连接输出");
        if let Some(data) = resend {
            output.send(data);
        }
        Ok(())
    }

    /// 断开输出；调用方随后可以释放旧输出
    pub fn disconnect_output(&self) {
        let mut st = self.inner.state.borrow_mut();
        assert!(st.output.is_some(), "connector: no output connected");
        st.output = None;
        st.out_busy = false;
        st.generation += 1;
        debug!(pending = st.packet.is_some(), "断开输出");
    }
}

impl ConnInner {
    fn input_handler_send(&self, data: Vec<u8>) {
        let output = {
            let mut st = self.state.borrow_mut();
            debug_assert!(st.packet.is_none());
            st.packet = Some(data.clone());
            let out = st.output.clone();
            st.out_busy = out.is_some();
            out
        };
        if let Some(out) = output {
            out.send(data);
        }
    }

    fn output_handler_done(&self, generation: u64) {
        {
            let mut st = self.state.borrow_mut();
            if st.generation != generation || !st.out_busy {
                trace!(generation, "忽略旧输出的完成回调");
                return;
            }
            st.out_busy = false;
            st.packet = None;
        }
        self.input.done();
    }
}
