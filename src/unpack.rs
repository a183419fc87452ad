//! Turns inbound datagrams into machine events and routes them to the responder or initiator
//!  worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use anyhow::bail;
use bytes::Buf;
use bytes_varint::try_get_fixed::TryGetFixedSupport;
use tokio::sync::mpsc;
use tracing::{debug, error, span, trace, warn, Level};
use crate::addr_tuple::AddrTuple;
use crate::events::*;
use crate::pdu::{AckType, PduCodec, PduType, WtpPdu};
use crate::tid::Tid;

/// Shorter datagrams can not even hold a tid
const MIN_DATAGRAM_LEN: usize = 3;

/// A leading zero octet marks several PDUs concatenated into one datagram
const CONCATENATION_MARKER: u8 = 0x00;

/// Splits a datagram into PDUs and unpacks each of them, preserving their order. Garbage is
///  logged and dropped, so the result may be empty.
pub fn unpack_datagram(codec: &dyn PduCodec, addr: &AddrTuple, datagram: &[u8]) -> Vec<WtpEvent> {
    if datagram.len() < MIN_DATAGRAM_LEN {
        warn!("datagram of {} bytes from {:?} is too short - dropping", datagram.len(), addr);
        return Vec::new();
    }

    let mut pdus = Vec::new();
    if datagram[0] == CONCATENATION_MARKER {
        if let Err(e) = split_concatenated(&datagram[1..], &mut pdus) {
            warn!("concatenated datagram from {:?}: {} - dropping the rest", addr, e);
        }
    }
    else {
        pdus.push(datagram);
    }

    pdus.into_iter()
        .filter_map(|pdu| match unpack_pdu(codec, addr, pdu) {
            Ok(event) => event,
            Err(e) => {
                warn!("undecodable PDU from {:?}: {} - dropping", addr, e);
                None
            }
        })
        .collect()
}

/// Each PDU is prefixed by its length: a single octet if the top bit is clear, otherwise the
///  length has 15 bits spread over two octets
fn split_concatenated<'a>(mut buf: &'a [u8], pdus: &mut Vec<&'a [u8]>) -> anyhow::Result<()> {
    while buf.has_remaining() {
        let first = buf.try_get_u8()?;
        let len = if first & 0x80 == 0 {
            first as usize
        }
        else {
            (((first & 0x7f) as usize) << 8) | buf.try_get_u8()? as usize
        };

        if buf.len() < len {
            bail!("PDU of {} bytes, but only {} bytes left", len, buf.len());
        }
        let (pdu, rest) = buf.split_at(len);
        pdus.push(pdu);
        buf = rest;
    }
    Ok(())
}

fn unpack_pdu(codec: &dyn PduCodec, addr: &AddrTuple, buf: &[u8]) -> anyhow::Result<Option<WtpEvent>> {
    let Some(&first) = buf.first() else {
        bail!("empty PDU");
    };

    let raw_type = (first >> 3) & 0x0f;
    match PduType::try_from(raw_type) {
        Ok(PduType::SegmentedResult) | Err(_) => {
            debug!("unsupported PDU type {} from {:?}", raw_type, addr);
            return Ok(Some(error_pdu(addr, raw_tid(buf)?)));
        }
        Ok(_) => {}
    }

    let event = match codec.decode(buf)? {
        WtpPdu::Invoke(invoke) => {
            if !invoke.tid.is_for_responder() {
                debug!("invoke from {:?} with initiator tid {}", addr, invoke.tid);
                return Ok(Some(error_pdu(addr, invoke.tid)));
            }
            WtpEvent::RcvInvoke(RcvInvokeData {
                addr: *addr,
                tid: invoke.tid,
                tcl: invoke.tcl,
                u_ack: invoke.u_ack,
                gtr: invoke.gtr,
                ttr: invoke.ttr,
                rid: invoke.rid,
                tid_new: invoke.tid_new,
                no_cache_supported: invoke.no_cache_supported,
                version: invoke.version,
                user_data: invoke.user_data,
            })
        }
        WtpPdu::Result(result) => {
            if result.tid.is_for_responder() {
                debug!("result from {:?} with responder tid {}", addr, result.tid);
                return Ok(Some(error_pdu(addr, result.tid)));
            }
            debug!("result from {:?} for initiator tid {} - results are not supported on the initiator side", addr, result.tid);
            return Ok(None);
        }
        WtpPdu::Ack(ack) => WtpEvent::RcvAck(RcvAckData {
            addr: *addr,
            tid: ack.tid,
            tid_ok: ack.ack_type == AckType::TidVerification,
            rid: ack.rid,
            psn: ack.psn,
        }),
        WtpPdu::Abort(abort) => WtpEvent::RcvAbort(RcvAbortData {
            addr: *addr,
            tid: abort.tid,
            abort_type: abort.abort_type,
            reason: abort.reason,
        }),
        WtpPdu::SegmentedInvoke(segment) => WtpEvent::RcvSegInvoke(RcvSegInvokeData {
            addr: *addr,
            tid: segment.tid,
            gtr: segment.gtr,
            ttr: segment.ttr,
            rid: segment.rid,
            psn: segment.psn,
            user_data: segment.user_data,
        }),
        WtpPdu::NegativeAck(nak) => WtpEvent::RcvNegativeAck(RcvNegativeAckData {
            addr: *addr,
            tid: nak.tid,
            rid: nak.rid,
            missing: nak.missing,
        }),
        WtpPdu::SegmentedResult(segment) => error_pdu(addr, segment.tid),
    };
    Ok(Some(event))
}

/// The tid is in octets 1 and 2 for every PDU type
fn raw_tid(buf: &[u8]) -> anyhow::Result<Tid> {
    let mut tid_buf = buf.get(1..).unwrap_or_default();
    Ok(Tid::from_raw(tid_buf.try_get_u16()?))
}

fn error_pdu(addr: &AddrTuple, tid: Tid) -> WtpEvent {
    WtpEvent::RcvErrorPdu(RcvErrorPduData { addr: *addr, tid })
}

/// Unpacks inbound datagrams and routes the resulting events by tid: tids below 0x8000 address
///  a responder machine, all others an initiator machine.
pub struct Dispatcher {
    codec: Arc<dyn PduCodec>,
    responder: mpsc::UnboundedSender<WtpEvent>,
    initiator: mpsc::UnboundedSender<WtpEvent>,
    sequence: AtomicU64,
}

impl Dispatcher {
    pub fn new(codec: Arc<dyn PduCodec>, responder: mpsc::UnboundedSender<WtpEvent>, initiator: mpsc::UnboundedSender<WtpEvent>) -> Dispatcher {
        Dispatcher {
            codec,
            responder,
            initiator,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn dispatch_datagram(&self, addr: AddrTuple, datagram: &[u8]) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let span = span!(Level::TRACE, "datagram_received", sequence);
        let _entered = span.enter();

        trace!("received datagram from {:?}: {:?}", addr, datagram);

        for event in unpack_datagram(self.codec.as_ref(), &addr, datagram) {
            self.route(event);
        }
    }

    fn route(&self, event: WtpEvent) {
        let Some((_, tid)) = event.network_key() else {
            error!("{} is not a network event - not routing it", event.name());
            return;
        };

        let (queue, side) = if tid.is_for_responder() {
            (&self.responder, "responder")
        }
        else {
            (&self.initiator, "initiator")
        };

        trace!("routing {} with tid {} to the {}", event.name(), tid, side);
        if queue.send(event).is_err() {
            debug!("{} is shut down - dropping event", side);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use bytes::Bytes;
    use rstest::rstest;
    use crate::pdu::{AbortPdu, AbortType, AckPdu, InvokePdu, MockPduCodec, ResultPdu, TransactionClass};
    use crate::test_util::addr::test_addr_tuple;

    const INVOKE: u8 = 0x08;
    const RESULT: u8 = 0x10;
    const ACK: u8 = 0x18;
    const ABORT: u8 = 0x20;
    const SEGMENTED_RESULT: u8 = 0x30;

    /// a stand-in wire format: type octet, tid, and the rest is user data
    fn toy_decode(buf: &[u8]) -> anyhow::Result<WtpPdu> {
        let tid = Tid::from_raw(u16::from_be_bytes([buf[1], buf[2]]));
        let user_data = Bytes::copy_from_slice(&buf[3..]);

        match buf[0] {
            INVOKE => Ok(WtpPdu::Invoke(InvokePdu { tid, gtr: true, ttr: true, rid: false, version: 0, tid_new: false, u_ack: false, tcl: TransactionClass::Class2, no_cache_supported: false, user_data })),
            RESULT => Ok(WtpPdu::Result(ResultPdu { tid, gtr: false, ttr: true, rid: false, user_data })),
            ACK => Ok(WtpPdu::Ack(AckPdu { tid, ack_type: AckType::Acknowledgement, rid: false, psn: None })),
            ABORT => Ok(WtpPdu::Abort(AbortPdu { tid, abort_type: AbortType::User, reason: buf[3] })),
            other => Err(anyhow!("toy codec does not support {}", other)),
        }
    }

    fn toy_codec() -> MockPduCodec {
        let mut codec = MockPduCodec::new();
        codec.expect_decode()
            .returning(toy_decode);
        codec
    }

    fn addr() -> AddrTuple {
        test_addr_tuple(1)
    }

    fn ack(tid: u16) -> WtpEvent {
        WtpEvent::RcvAck(RcvAckData { addr: addr(), tid: Tid::from_raw(tid), tid_ok: false, rid: false, psn: None })
    }

    fn error_event(tid: u16) -> WtpEvent {
        WtpEvent::RcvErrorPdu(RcvErrorPduData { addr: addr(), tid: Tid::from_raw(tid) })
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::two_bytes(vec![ACK, 0])]
    fn test_short_datagram_is_dropped(#[case] datagram: Vec<u8>) {
        let mut codec = MockPduCodec::new();
        codec.expect_decode().never();

        assert!(unpack_datagram(&codec, &addr(), &datagram).is_empty());
    }

    #[rstest]
    #[case::ack(vec![ACK, 0x80, 0x05], vec![ack(0x8005)])]
    #[case::invoke_for_initiator(vec![INVOKE, 0x80, 0x05], vec![error_event(0x8005)])]
    #[case::result_for_responder(vec![RESULT, 0x00, 0x05], vec![error_event(0x0005)])]
    #[case::result_for_initiator(vec![RESULT, 0x80, 0x05], vec![])]
    #[case::segmented_result(vec![SEGMENTED_RESULT, 0x12, 0x34], vec![error_event(0x1234)])]
    #[case::unknown_type(vec![0x78, 0x00, 0x07], vec![error_event(0x0007)])]
    #[case::undecodable(vec![0x38, 0x00, 0x07], vec![])]
    #[case::concatenated(vec![0x00, 3, ACK, 0x80, 0x01, 3, ACK, 0x80, 0x02], vec![ack(0x8001), ack(0x8002)])]
    #[case::concatenated_long_length(vec![0x00, 0x80, 3, ACK, 0x80, 0x01, 3, ACK, 0x80, 0x02], vec![ack(0x8001), ack(0x8002)])]
    #[case::concatenated_truncated(vec![0x00, 3, ACK, 0x80, 0x01, 9, ACK, 0x80, 0x02], vec![ack(0x8001)])]
    #[case::concatenated_with_garbage(vec![0x00, 3, 0x38, 0x80, 0x01, 3, ACK, 0x80, 0x02], vec![ack(0x8002)])]
    fn test_unpack(#[case] datagram: Vec<u8>, #[case] expected: Vec<WtpEvent>) {
        assert_eq!(unpack_datagram(&toy_codec(), &addr(), &datagram), expected);
    }

    #[test]
    fn test_unpack_invoke() {
        let events = unpack_datagram(&toy_codec(), &addr(), &[INVOKE, 0x00, 0x09, b'h', b'i']);
        assert_eq!(events.len(), 1);
        match &events[0] {
            WtpEvent::RcvInvoke(invoke) => {
                assert_eq!(invoke.tid, Tid::from_raw(9));
                assert_eq!(invoke.tcl, TransactionClass::Class2);
                assert_eq!(invoke.user_data, Bytes::from_static(b"hi"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_dispatcher_routes_by_tid() {
        let (responder_send, mut responder) = mpsc::unbounded_channel();
        let (initiator_send, mut initiator) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(Arc::new(toy_codec()), responder_send, initiator_send);

        dispatcher.dispatch_datagram(addr(), &[0x00, 4, ABORT, 0x00, 0x01, 7, 3, ACK, 0x80, 0x02, 3, ACK, 0x00, 0x03]);

        assert_eq!(responder.try_recv().ok(), Some(WtpEvent::RcvAbort(RcvAbortData {
            addr: addr(),
            tid: Tid::from_raw(1),
            abort_type: AbortType::User,
            reason: 7,
        })));
        assert_eq!(responder.try_recv().ok(), Some(ack(0x0003)));
        assert!(responder.try_recv().is_err());

        assert_eq!(initiator.try_recv().ok(), Some(ack(0x8002)));
        assert!(initiator.try_recv().is_err());
    }

    #[test]
    fn test_dispatcher_survives_closed_queue() {
        let (responder_send, responder) = mpsc::unbounded_channel();
        let (initiator_send, _initiator) = mpsc::unbounded_channel();
        drop(responder);
        let dispatcher = Dispatcher::new(Arc::new(toy_codec()), responder_send, initiator_send);

        dispatcher.dispatch_datagram(addr(), &[ACK, 0x00, 0x01]);
    }
}
