//! Flow 接口
//!
//! 三种点对点接口共享同一个状态机（见 `channel`）：
//! - [`PacketPassInterface`]：发送方推送整包
//! - [`PacketRecvInterface`]：接收方提供缓冲区拉取整包
//! - [`StreamPassInterface`]：发送方推送字节流，接收方可部分接受
//!
//! 其余模块是只用这些接口搭起来的通用转接层。

mod channel;
mod connector;
mod copier;
mod notifier;
mod packet_buffer;
mod packet_pass;
mod packet_recv;
mod recv_connector;
mod recv_notifier;
mod single_packet_buffer;
mod stream_pass;
mod stream_sender;

pub use channel::ChannelState;
pub use connector::PacketPassConnector;
pub use copier::PacketCopier;
pub use notifier::PacketPassNotifier;
pub use packet_buffer::PacketBuffer;
pub use packet_pass::{PacketPassHandle, PacketPassInterface};
pub use packet_recv::{PacketRecvHandle, PacketRecvInterface};
pub use recv_connector::PacketRecvConnector;
pub use recv_notifier::PacketRecvNotifier;
pub use single_packet_buffer::SinglePacketBuffer;
pub use stream_pass::{StreamPassHandle, StreamPassInterface};
pub use stream_sender::PacketStreamSender;
