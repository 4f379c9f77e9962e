//! PacketPass 输入到 PacketRecv 输出的拷贝层
//!
//! 两侧都就绪（一边交来包，一边交来缓冲区）时把包拷进缓冲区，
//! 然后同时完成两边。两侧都支持 cancel。

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::pending::PendingGroup;

use super::{PacketPassHandle, PacketPassInterface, PacketRecvHandle, PacketRecvInterface};

#[derive(Default)]
struct CopierState {
    in_packet: Option<Vec<u8>>,
    out_buf: Option<Vec<u8>>,
}

struct CopierInner {
    input: PacketPassInterface,
    output: PacketRecvInterface,
    state: RefCell<CopierState>,
}

pub struct PacketCopier {
    inner: Rc<CopierInner>,
}

impl PacketCopier {
    pub fn new(mtu: usize, pg: &PendingGroup) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<CopierInner>| {
            let (w1, w2, w3, w4) = (weak.clone(), weak.clone(), weak.clone(), weak.clone());
            let input = PacketPassInterface::new(mtu, pg, move |data| {
                if let Some(c) = w1.upgrade() {
                    c.state.borrow_mut().in_packet = Some(data);
                    c.try_copy();
                }
            });
            input.enable_cancel(move || {
                if let Some(c) = w2.upgrade() {
                    c.state.borrow_mut().in_packet = None;
                }
            });
            let output = PacketRecvInterface::new(mtu, pg, move |buf| {
                if let Some(c) = w3.upgrade() {
                    c.state.borrow_mut().out_buf = Some(buf);
                    c.try_copy();
                }
            });
            output.enable_cancel(move || {
                if let Some(c) = w4.upgrade() {
                    c.state.borrow_mut().out_buf = None;
                }
            });
            CopierInner {
                input,
                output,
                state: RefCell::new(CopierState::default()),
            }
        });
        Self { inner }
    }

    pub fn input(&self) -> PacketPassHandle {
        self.inner.input.handle()
    }

    pub fn output(&self) -> PacketRecvHandle {
        self.inner.output.handle()
    }
}

impl CopierInner {
    fn try_copy(&self) {
        let filled = {
            let mut st = self.state.borrow_mut();
            if st.in_packet.is_none() || st.out_buf.is_none() {
                return;
            }
            let (Some(data), Some(mut buf)) = (st.in_packet.take(), st.out_buf.take()) else {
                unreachable!("both sides checked above");
            };
            buf.extend_from_slice(&data);
            buf
        };
        self.input.done();
        self.output.done(filled);
    }
}
