//! PacketRecv 接口：接收方提供缓冲区，发送方把一个包填进去
//!
//! 与 PacketPass 对偶：操作由接收方（user）发起，数据由 provider 产生。

use crate::pending::PendingGroup;

use super::channel::{Channel, ChannelRef, ChannelState};

/// 拉取式包接口，由数据提供方持有；drop 即释放。
pub struct PacketRecvInterface {
    chan: Channel<Vec<u8>, Vec<u8>>,
}

#[derive(Clone)]
pub struct PacketRecvHandle {
    chan: ChannelRef<Vec<u8>, Vec<u8>>,
}

impl PacketRecvInterface {
    /// `handler_recv` 收到一个已清空、容量不小于 MTU 的缓冲区，
    /// 填好后调用 `done` 交回。
    pub fn new(mtu: usize, pg: &PendingGroup, handler_recv: impl FnMut(Vec<u8>) + 'static) -> Self {
        Self {
            chan: Channel::new("PacketRecvInterface", Some(mtu), pg, handler_recv),
        }
    }

    pub fn handle(&self) -> PacketRecvHandle {
        PacketRecvHandle {
            chan: self.chan.handle(),
        }
    }

    pub fn enable_cancel(&self, handler: impl FnMut() + 'static) {
        self.chan.inner().enable_cancel(handler);
    }

    pub fn done(&self, data: Vec<u8>) {
        check_len(&data, self.mtu());
        self.chan.inner().done(data);
    }

    pub fn mtu(&self) -> usize {
        self.chan.inner().mtu().expect("packet interfaces have an MTU")
    }

    pub fn state(&self) -> ChannelState {
        self.chan.inner().state()
    }
}

impl PacketRecvHandle {
    /// 以接收方身份接入；`handler_done` 收到填好的缓冲区。
    pub fn receiver_init(&self, handler_done: impl FnMut(Vec<u8>) + 'static) {
        self.chan.get().sender_init(handler_done);
    }

    /// 提交缓冲区请求一个包；缓冲区会被清空并保证容量不小于 MTU。
    pub fn recv(&self, mut buf: Vec<u8>) {
        let chan = self.chan.get();
        let mtu = chan.mtu().expect("packet interfaces have an MTU");
        buf.clear();
        buf.reserve(mtu);
        chan.start(buf);
    }

    pub fn cancel(&self) {
        self.chan.get().cancel();
    }

    /// 数据提供方完成（在回调中通过句柄调用）
    pub fn done(&self, data: Vec<u8>) {
        let chan = self.chan.get();
        check_len(&data, chan.mtu().expect("packet interfaces have an MTU"));
        chan.done(data);
    }

    pub fn mtu(&self) -> usize {
        self.chan.get().mtu().expect("packet interfaces have an MTU")
    }

    pub fn has_cancel(&self) -> bool {
        self.chan.get().has_cancel()
    }

    pub fn state(&self) -> ChannelState {
        self.chan.get().state()
    }

    pub fn is_freed(&self) -> bool {
        self.chan.is_freed()
    }
}

fn check_len(data: &[u8], mtu: usize) {
    assert!(
        data.len() <= mtu,
        "PacketRecvInterface: packet of {} bytes exceeds MTU {}",
        data.len(),
        mtu
    );
}
