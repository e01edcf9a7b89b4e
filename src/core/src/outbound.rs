use gateway_protocol::{PushFrame, ResponseFrame, SystemFrame};

/// Everything the connection's single writer task can be asked to send.
/// All outbound writes funnel through one channel into one task so that
/// concurrent producers (the request pipeline, the subscription
/// manager's forwarders, the heartbeat ticker) never race on the socket.
#[derive(Debug)]
pub enum OutboundMessage {
    Response(ResponseFrame),
    Push(PushFrame),
    System(SystemFrame),
    Close { code: u16, reason: &'static str },
}
