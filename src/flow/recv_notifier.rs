//! 在交出每个收到的包之前调用观察回调的 PacketRecv 层

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::pending::PendingGroup;

use super::{PacketRecvHandle, PacketRecvInterface};

type Hook = Box<dyn FnMut(&[u8])>;

struct NotifierInner {
    input: PacketRecvHandle,
    output: PacketRecvInterface,
    hook: RefCell<Option<Hook>>,
}

pub struct PacketRecvNotifier {
    inner: Rc<NotifierInner>,
}

impl PacketRecvNotifier {
    /// 以 `input` 的接收方身份创建；输出 MTU 与输入相同。
    /// 输入支持 cancel 时输出也支持，并原样转发。
    pub fn new(input: PacketRecvHandle, pg: &PendingGroup) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<NotifierInner>| {
            let w_recv = weak.clone();
            let w_done = weak.clone();
            let output = PacketRecvInterface::new(input.mtu(), pg, move |buf| {
                if let Some(n) = w_recv.upgrade() {
                    n.input.recv(buf);
                }
            });
            if input.has_cancel() {
                let inp = input.clone();
                output.enable_cancel(move || inp.cancel());
            }
            input.receiver_init(move |data| {
                if let Some(n) = w_done.upgrade() {
                    n.input_handler_done(data);
                }
            });
            NotifierInner {
                input: input.clone(),
                output,
                hook: RefCell::new(None),
            }
        });
        Self { inner }
    }

    pub fn output(&self) -> PacketRecvHandle {
        self.inner.output.handle()
    }

    pub fn set_handler(&self, hook: Option<Box<dyn FnMut(&[u8])>>) {
        *self.inner.hook.borrow_mut() = hook;
    }
}

impl NotifierInner {
    fn input_handler_done(&self, data: Vec<u8>) {
        if let Some(hook) = self.hook.borrow_mut().as_mut() {
            hook(&data);
        }
        self.output.done(data);
    }
}
