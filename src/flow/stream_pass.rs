//! StreamPass 接口：发送方推送字节流，接收方每次可以只接受一部分
//!
//! 接收方用 `done(buf, accepted)` 把缓冲区交还，`accepted` 为本次接受的
//! 前缀长度（至少 1 字节）。剩余部分由发送方自行重新提交。

use crate::pending::PendingGroup;

use super::channel::{Channel, ChannelRef, ChannelState};

/// 完成结果：交还的缓冲区和被接受的字节数
type StreamDone = (Vec<u8>, usize);

pub struct StreamPassInterface {
    chan: Channel<Vec<u8>, StreamDone>,
}

#[derive(Clone)]
pub struct StreamPassHandle {
    chan: ChannelRef<Vec<u8>, StreamDone>,
}

impl StreamPassInterface {
    pub fn new(pg: &PendingGroup, handler_send: impl FnMut(Vec<u8>) + 'static) -> Self {
        Self {
            chan: Channel::new("StreamPassInterface", None, pg, handler_send),
        }
    }

    pub fn handle(&self) -> StreamPassHandle {
        StreamPassHandle {
            chan: self.chan.handle(),
        }
    }

    pub fn enable_cancel(&self, handler: impl FnMut() + 'static) {
        self.chan.inner().enable_cancel(handler);
    }

    pub fn done(&self, data: Vec<u8>, accepted: usize) {
        check_accepted(&data, accepted);
        self.chan.inner().done((data, accepted));
    }

    pub fn state(&self) -> ChannelState {
        self.chan.inner().state()
    }
}

impl StreamPassHandle {
    /// `handler_done(buf, accepted)`：拿回缓冲区及被接受的字节数
    pub fn sender_init(&self, handler_done: impl FnMut(Vec<u8>, usize) + 'static) {
        let mut handler_done = handler_done;
        self.chan
            .get()
            .sender_init(move |(data, accepted)| handler_done(data, accepted));
    }

    pub fn send(&self, data: Vec<u8>) {
        assert!(!data.is_empty(), "StreamPassInterface: empty send");
        self.chan.get().start(data);
    }

    pub fn cancel(&self) {
        self.chan.get().cancel();
    }

    pub fn done(&self, data: Vec<u8>, accepted: usize) {
        check_accepted(&data, accepted);
        self.chan.get().done((data, accepted));
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

fn check_accepted(data: &[u8], accepted: usize) {
    assert!(
        accepted > 0 && accepted <= data.len(),
        "StreamPassInterface: accepted {} of {} bytes",
        accepted,
        data.len()
    );
}
