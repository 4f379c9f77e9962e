//! 在转发每个包之前调用一个观察回调的 PacketPass 层

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::pending::PendingGroup;

use super::{PacketPassHandle, PacketPassInterface};

type Hook = Box<dyn FnMut(&[u8])>;

struct NotifierInner {
    input: PacketPassInterface,
    output: PacketPassHandle,
    hook: RefCell<Option<Hook>>,
}

pub struct PacketPassNotifier {
    inner: Rc<NotifierInner>,
}

impl PacketPassNotifier {
    /// 以 `output` 的发送方身份创建；输入 MTU 与输出相同。
    /// 输出支持 cancel 时输入也支持，并原样转发。
    pub fn new(output: PacketPassHandle, pg: &PendingGroup) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<NotifierInner>| {
            let w_send = weak.clone();
            let w_done = weak.clone();
            let input = PacketPassInterface::new(output.mtu(), pg, move |data| {
                if let Some(n) = w_send.upgrade() {
                    n.input_handler_send(data);
                }
            });
            if output.has_cancel() {
                let out = output.clone();
                input.enable_cancel(move || out.cancel());
            }
            output.sender_init(move || {
                if let Some(n) = w_done.upgrade() {
                    n.input.done();
                }
            });
            NotifierInner {
                input,
                output: output.clone(),
                hook: RefCell::new(None),
            }
        });
        Self { inner }
    }

    pub fn input(&self) -> PacketPassHandle {
        self.inner.input.handle()
    }

    /// 设置（或清除）观察回调
    pub fn set_handler(&self, hook: Option<Box<dyn FnMut(&[u8])>>) {
        *self.inner.hook.borrow_mut() = hook;
    }
}

impl NotifierInner {
    fn input_handler_send(&self, data: Vec<u8>) {
        // 回调期间不能再调用 set_handler
        if let Some(hook) = self.hook.borrow_mut().as_mut() {
            hook(&data);
        }
        self.output.send(data);
    }
}
