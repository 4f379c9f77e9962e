//! PacketPass 接口：发送方把一个包推给接收方
//!
//! 接收方（provider）持有 [`PacketPassInterface`]，收到包后在某个时刻调用
//! `done`；发送方（user）通过 [`PacketPassHandle`] 调用 `send`，并在完成回调
//! 触发后才能发送下一个包。

use crate::pending::PendingGroup;

use super::channel::{Channel, ChannelRef, ChannelState};

/// 推送式包接口，由接收方持有；drop 即释放。
pub struct PacketPassInterface {
    chan: Channel<Vec<u8>, ()>,
}

/// [`PacketPassInterface`] 的句柄，供发送方（以及接收方的回调）使用。
#[derive(Clone)]
pub struct PacketPassHandle {
    chan: ChannelRef<Vec<u8>, ()>,
}

impl PacketPassInterface {
    /// 创建接口。`handler_send` 在 job 中收到发送方提交的包。
    pub fn new(mtu: usize, pg: &PendingGroup, handler_send: impl FnMut(Vec<u8>) + 'static) -> Self {
        Self {
            chan: Channel::new("PacketPassInterface", Some(mtu), pg, handler_send),
        }
    }

    pub fn handle(&self) -> PacketPassHandle {
        PacketPassHandle {
            chan: self.chan.handle(),
        }
    }

    /// 支持发送方撤销正在处理的包；`handler` 在撤销时同步调用。
    pub fn enable_cancel(&self, handler: impl FnMut() + 'static) {
        self.chan.inner().enable_cancel(handler);
    }

    /// 支持发送方请求提前结束；`handler` 被调度后应尽快调用 `done`。
    pub fn enable_request_cancel(&self, handler: impl FnMut() + 'static) {
        self.chan.inner().enable_request_cancel(handler);
    }

    pub fn done(&self) {
        self.chan.inner().done(());
    }

    pub fn mtu(&self) -> usize {
        self.chan.inner().mtu().expect("packet interfaces have an MTU")
    }

    pub fn state(&self) -> ChannelState {
        self.chan.inner().state()
    }
}

impl PacketPassHandle {
    /// 不指向任何接口的句柄；只可用于占位
    pub(crate) fn dangling() -> Self {
        Self {
            chan: ChannelRef::dangling(),
        }
    }

    /// 以发送方身份接入；`handler_done` 在每个包完成后调用。
    pub fn sender_init(&self, handler_done: impl FnMut() + 'static) {
        let mut handler_done = handler_done;
        self.chan.get().sender_init(move |()| handler_done());
    }

    pub fn send(&self, data: Vec<u8>) {
        let chan = self.chan.get();
        let mtu = chan.mtu().expect("packet interfaces have an MTU");
        assert!(
            data.len() <= mtu,
            "PacketPassInterface: packet of {} bytes exceeds MTU {}",
            data.len(),
            mtu
        );
        chan.start(data);
    }

    pub fn cancel(&self) {
        self.chan.get().cancel();
    }

    /// 请求提前结束当前包；包尚未交给接收方时直接完成且接收方看不到它。
    pub fn request_cancel(&self) {
        self.chan.get().request_cancel(|_| ());
    }

    /// 接收方完成当前包（在回调中通过句柄调用）
    pub fn done(&self) {
        self.chan.get().done(());
    }

    pub fn mtu(&self) -> usize {
        self.chan.get().mtu().expect("packet interfaces have an MTU")
    }

    pub fn has_cancel(&self) -> bool {
        self.chan.get().has_cancel()
    }

    pub fn has_request_cancel(&self) -> bool {
        self.chan.get().has_request_cancel()
    }

    pub fn has_sender(&self) -> bool {
        self.chan.get().has_sender()
    }

    pub fn state(&self) -> ChannelState {
        self.chan.get().state()
    }

    pub fn is_freed(&self) -> bool {
        self.chan.is_freed()
    }
}
