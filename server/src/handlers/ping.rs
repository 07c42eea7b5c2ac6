//! Keep-alive handler

use crate::messages::{Ack, Ping};

/// Handle PING: acknowledge with an empty, successful ack
pub fn handle_ping(ping: &Ping) -> Vec<u8> {
    Ack::ok(ping.ack_handle, Vec::new()).to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::Envelope;

    #[test]
    fn test_ping_acks_handle() {
        let reply = handle_ping(&Ping { ack_handle: 0x1234 });
        let ack = Ack::parse(&Envelope::parse(&reply).unwrap()).unwrap();
        assert_eq!(ack, Ack::ok(0x1234, Vec::new()));
    }
}
