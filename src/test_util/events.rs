use bytes::Bytes;
use crate::addr_tuple::AddrTuple;
use crate::events::{RcvAbortData, RcvAckData, RcvInvokeData, RcvNegativeAckData, RcvSegInvokeData, WtpEvent};
use crate::pdu::{AbortType, TransactionClass, WtpPdu};
use crate::tid::Tid;

/// A single-segment class 2 invoke without user acknowledgement
pub fn rcv_invoke(addr: AddrTuple, tid: Tid) -> RcvInvokeData {
    RcvInvokeData {
        addr,
        tid,
        tcl: TransactionClass::Class2,
        u_ack: false,
        gtr: true,
        ttr: true,
        rid: false,
        tid_new: false,
        no_cache_supported: false,
        version: 0,
        user_data: Bytes::from_static(b"invoke"),
    }
}

pub fn rcv_seg_invoke(addr: AddrTuple, tid: Tid, psn: u8, gtr: bool, ttr: bool, user_data: &'static [u8]) -> RcvSegInvokeData {
    RcvSegInvokeData {
        addr,
        tid,
        gtr,
        ttr,
        rid: false,
        psn,
        user_data: Bytes::from_static(user_data),
    }
}

pub fn rcv_ack(addr: AddrTuple, tid: Tid) -> RcvAckData {
    RcvAckData {
        addr,
        tid,
        tid_ok: false,
        rid: false,
        psn: None,
    }
}

pub fn rcv_negative_ack(addr: AddrTuple, tid: Tid, missing: Vec<u8>) -> RcvNegativeAckData {
    RcvNegativeAckData {
        addr,
        tid,
        rid: false,
        missing,
    }
}

pub fn rcv_abort(addr: AddrTuple, tid: Tid, reason: u8) -> RcvAbortData {
    RcvAbortData {
        addr,
        tid,
        abort_type: AbortType::User,
        reason,
    }
}

/// Turns a result PDU (or segment thereof) into the event a peer that runs a responder's
///  reassembly logic would see for it, i.e. an invoke for psn 0 and segmented invokes after that
pub fn segment_event_for(addr: AddrTuple, pdu: WtpPdu) -> WtpEvent {
    match pdu {
        WtpPdu::Result(result) => {
            let mut invoke = rcv_invoke(addr, result.tid);
            invoke.gtr = result.gtr;
            invoke.ttr = result.ttr;
            invoke.rid = result.rid;
            invoke.user_data = result.user_data;
            WtpEvent::RcvInvoke(invoke)
        }
        WtpPdu::SegmentedResult(segment) => {
            WtpEvent::RcvSegInvoke(RcvSegInvokeData {
                addr,
                tid: segment.tid,
                gtr: segment.gtr,
                ttr: segment.ttr,
                rid: segment.rid,
                psn: segment.psn,
                user_data: segment.user_data,
            })
        }
        other => panic!("not a result PDU: {:?}", other),
    }
}
