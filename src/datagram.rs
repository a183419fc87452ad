//! The datagram layer below WTP: encoding outbound PDUs and moving datagrams over UDP.

use std::sync::Arc;
use async_trait::async_trait;
use bytes::BytesMut;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};
use crate::addr_tuple::AddrTuple;
use crate::output::OutboundPdu;
use crate::pdu::PduCodec;
use crate::unpack::Dispatcher;

/// The largest possible UDP payload
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    async fn send_datagram(&self, addr: &AddrTuple, datagram: &[u8]) -> anyhow::Result<()>;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_datagram(&self, addr: &AddrTuple, datagram: &[u8]) -> anyhow::Result<()> {
        self.send_to(datagram, addr.remote).await?;
        Ok(())
    }
}

/// Encodes PDUs from the engine and sends them, until the engine's side of the queue is dropped
pub async fn run_datagram_sender(socket: Arc<dyn DatagramSocket>, codec: Arc<dyn PduCodec>, mut outbound: mpsc::UnboundedReceiver<OutboundPdu>) {
    debug!("starting datagram sender");

    let mut buf = BytesMut::with_capacity(MAX_DATAGRAM_SIZE);
    while let Some(OutboundPdu { addr, pdu }) = outbound.recv().await {
        buf.clear();
        codec.encode(&pdu, &mut buf);

        trace!("sending {:?} PDU to {:?}: {:?}", pdu.pdu_type(), addr, buf.as_ref());
        if let Err(e) = socket.send_datagram(&addr, &buf).await {
            error!("error sending datagram to {:?}: {}", addr, e);
        }
    }

    debug!("outbound queue closed - shutting down datagram sender");
}

/// Receives datagrams from a UDP socket and hands them to the dispatcher. Socket errors are
///  logged, and the loop goes on.
pub async fn run_datagram_receiver(socket: Arc<UdpSocket>, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let local = socket.local_addr()?;
    info!("starting datagram receive loop on {:?}", local);

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(x) => x,
            Err(e) => {
                error!("socket error: {}", e);
                continue;
            }
        };
        dispatcher.dispatch_datagram(AddrTuple::new(local, from), &buf[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use anyhow::anyhow;
    use bytes::{BufMut, Bytes};
    use mockall::Sequence;
    use crate::events::{RcvAckData, WtpEvent};
    use crate::pdu::{AckPdu, AckType, MockPduCodec, ResultPdu, WtpPdu};
    use crate::test_util::addr::test_addr_tuple;
    use crate::tid::Tid;

    fn ack_pdu(tid: u16) -> WtpPdu {
        WtpPdu::Ack(AckPdu { tid: Tid::from_raw(tid), ack_type: AckType::Acknowledgement, rid: false, psn: None })
    }

    /// type octet followed by the tid
    fn header_codec() -> MockPduCodec {
        let mut codec = MockPduCodec::new();
        codec.expect_encode()
            .returning(|pdu, buf| {
                buf.put_u8(u8::from(pdu.pdu_type()) << 3);
                buf.put_u16(pdu.tid().to_raw());
            });
        codec.expect_decode()
            .returning(|buf| Ok(ack_pdu(u16::from_be_bytes([buf[1], buf[2]]))));
        codec
    }

    #[tokio::test]
    async fn test_sender_encodes_and_sends() {
        let mut socket = MockDatagramSocket::new();
        let mut seq = Sequence::new();
        socket.expect_send_datagram()
            .withf(|addr, datagram| *addr == test_addr_tuple(1) && datagram == [0x18, 0x80, 0x05])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        socket.expect_send_datagram()
            .withf(|addr, datagram| *addr == test_addr_tuple(2) && datagram == [0x10, 0x00, 0x07])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let (send, recv) = mpsc::unbounded_channel();
        send.send(OutboundPdu { addr: test_addr_tuple(1), pdu: ack_pdu(0x8005) }).unwrap();
        send.send(OutboundPdu {
            addr: test_addr_tuple(2),
            pdu: WtpPdu::Result(ResultPdu { tid: Tid::from_raw(7), gtr: false, ttr: true, rid: false, user_data: Bytes::new() }),
        }).unwrap();
        drop(send);

        run_datagram_sender(Arc::new(socket), Arc::new(header_codec()), recv).await;
    }

    #[tokio::test]
    async fn test_sender_survives_send_errors() {
        let mut socket = MockDatagramSocket::new();
        let mut seq = Sequence::new();
        socket.expect_send_datagram()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(anyhow!("network is unreachable")));
        socket.expect_send_datagram()
            .withf(|addr, _| *addr == test_addr_tuple(2))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let (send, recv) = mpsc::unbounded_channel();
        send.send(OutboundPdu { addr: test_addr_tuple(1), pdu: ack_pdu(1) }).unwrap();
        send.send(OutboundPdu { addr: test_addr_tuple(2), pdu: ack_pdu(2) }).unwrap();
        drop(send);

        run_datagram_sender(Arc::new(socket), Arc::new(header_codec()), recv).await;
    }

    #[tokio::test]
    async fn test_receiver_dispatches() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let local = socket.local_addr().unwrap();

        let (responder_send, mut responder) = mpsc::unbounded_channel();
        let (initiator_send, mut initiator) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(header_codec()), responder_send, initiator_send));
        let receiver = tokio::spawn(run_datagram_receiver(socket, dispatcher));

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(&[0x18, 0x80, 0x05], local).await.unwrap();
        peer.send_to(&[0x18, 0x00, 0x06], local).await.unwrap();

        let addr = AddrTuple::new(local, peer.local_addr().unwrap());
        let expected = |tid: u16| WtpEvent::RcvAck(RcvAckData { addr, tid: Tid::from_raw(tid), tid_ok: false, rid: false, psn: None });

        let to_initiator = tokio::time::timeout(Duration::from_secs(5), initiator.recv()).await.unwrap();
        assert_eq!(to_initiator, Some(expected(0x8005)));
        let to_responder = tokio::time::timeout(Duration::from_secs(5), responder.recv()).await.unwrap();
        assert_eq!(to_responder, Some(expected(0x0006)));

        receiver.abort();
    }
}
