// Live push channel (NATS transport + subscription lifecycle)

mod channel;
mod client;

pub use channel::{
    ChannelError, ChannelState, MessageHandler, MessageStream, PushChannelManager, PushTransport,
};
pub use client::{NatsTransport, PushConfig};
