//! Builds outbound PDUs from machine state. Machines keep tids in RcvTID form, so every PDU built
//!  here carries the tid converted to SendTID.

use bytes::Bytes;
use crate::pdu::{AbortPdu, AbortType, AckPdu, AckType, InvokePdu, NegativeAckPdu, ResultPdu, SegmentPdu, TransactionClass, WtpPdu};
use crate::sar::Fragmentation;
use crate::tid::Tid;

pub fn pack_ack(tid: Tid, ack_type: AckType, rid: bool) -> WtpPdu {
    WtpPdu::Ack(AckPdu {
        tid: tid.send_tid(),
        ack_type,
        rid,
        psn: None,
    })
}

/// Acknowledges a received segment of a segmented invoke
pub fn pack_sar_ack(tid: Tid, psn: u8) -> WtpPdu {
    WtpPdu::Ack(AckPdu {
        tid: tid.send_tid(),
        ack_type: AckType::Acknowledgement,
        rid: false,
        psn: Some(psn),
    })
}

pub fn pack_negative_ack(tid: Tid, missing: Vec<u8>) -> WtpPdu {
    WtpPdu::NegativeAck(NegativeAckPdu {
        tid: tid.send_tid(),
        rid: false,
        missing,
    })
}

pub fn pack_abort(tid: Tid, abort_type: AbortType, reason: impl Into<u8>) -> WtpPdu {
    WtpPdu::Abort(AbortPdu {
        tid: tid.send_tid(),
        abort_type,
        reason: reason.into(),
    })
}

pub fn pack_invoke(tid: Tid, tcl: TransactionClass, u_ack: bool, tid_new: bool, user_data: Bytes) -> WtpPdu {
    WtpPdu::Invoke(InvokePdu {
        tid: tid.send_tid(),
        gtr: true,
        ttr: true,
        rid: false,
        version: 0,
        tid_new,
        u_ack,
        tcl,
        no_cache_supported: false,
        user_data,
    })
}

/// A result that fits into a single PDU
pub fn pack_result(tid: Tid, user_data: Bytes) -> WtpPdu {
    WtpPdu::Result(ResultPdu {
        tid: tid.send_tid(),
        gtr: false,
        ttr: true,
        rid: false,
        user_data,
    })
}

pub struct PackedSegment {
    pub pdu: WtpPdu,
    /// the sender must wait for an ack after this segment
    pub requires_ack: bool,
}

/// One segment of a segmented result: psn 0 goes out as a Result PDU, continuations as Segmented
///  Result PDUs
pub fn pack_sar_result(tid: Tid, fragmentation: &Fragmentation, psn: u8, rid: bool) -> PackedSegment {
    let gtr = fragmentation.is_group_trailer(psn);
    let ttr = fragmentation.is_transmission_trailer(psn);
    let user_data = fragmentation.segment(psn);

    let pdu = if psn == 0 {
        WtpPdu::Result(ResultPdu { tid: tid.send_tid(), gtr, ttr, rid, user_data })
    }
    else {
        WtpPdu::SegmentedResult(SegmentPdu { tid: tid.send_tid(), gtr, ttr, rid, psn, user_data })
    };

    PackedSegment {
        pdu,
        requires_ack: gtr || ttr,
    }
}

/// The segments after the last confirmed one, up to and including the first one after which the
///  sender has to wait for an ack. Empty once the whole result is confirmed.
pub fn pack_sar_batch(tid: Tid, fragmentation: &Fragmentation, rid: bool) -> Vec<WtpPdu> {
    let Some(first) = fragmentation.next_unconfirmed() else {
        return Vec::new();
    };

    let mut result = Vec::new();
    for psn in first..=fragmentation.last_psn() {
        let packed = pack_sar_result(tid, fragmentation, psn, rid);
        result.push(packed.pdu);
        if packed.requires_ack {
            break;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::AbortReason;

    #[test]
    fn test_pack_converts_tid() {
        let tid = Tid::from_raw(0x0042);

        assert_eq!(pack_ack(tid, AckType::TidVerification, true), WtpPdu::Ack(AckPdu {
            tid: Tid::from_raw(0x8042),
            ack_type: AckType::TidVerification,
            rid: true,
            psn: None,
        }));
        assert_eq!(pack_abort(tid, AbortType::Provider, AbortReason::NoResponse), WtpPdu::Abort(AbortPdu {
            tid: Tid::from_raw(0x8042),
            abort_type: AbortType::Provider,
            reason: 8,
        }));
        assert_eq!(pack_sar_ack(Tid::from_raw(0x8042), 3).tid(), Tid::from_raw(0x0042));
    }

    #[test]
    fn test_pack_sar_result_flags() {
        // psn 0..=4, groups of 2
        let fragmentation = Fragmentation::new(Bytes::from(vec![7u8; 45]), 10, 2).unwrap();
        let tid = Tid::from_raw(1);

        let flags = (0..=4)
            .map(|psn| {
                let packed = pack_sar_result(tid, &fragmentation, psn, false);
                match packed.pdu {
                    WtpPdu::Result(p) => (p.gtr, p.ttr, packed.requires_ack),
                    WtpPdu::SegmentedResult(p) => {
                        assert_eq!(p.psn, psn);
                        (p.gtr, p.ttr, packed.requires_ack)
                    }
                    other => panic!("unexpected PDU {:?}", other),
                }
            })
            .collect::<Vec<_>>();

        assert_eq!(flags, vec![
            (false, false, false),
            (true, false, true),
            (false, false, false),
            (true, false, true),
            (false, true, true),
        ]);
    }

    fn psns(pdus: &[WtpPdu]) -> Vec<u8> {
        pdus.iter()
            .map(|pdu| match pdu {
                WtpPdu::Result(_) => 0,
                WtpPdu::SegmentedResult(s) => s.psn,
                other => panic!("unexpected PDU {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_pack_sar_batch() {
        // 8 segments, psn 0..=7, groups of 3
        let mut fragmentation = Fragmentation::new(Bytes::from(vec![1u8; 75]), 10, 3).unwrap();
        let tid = Tid::from_raw(1);

        assert_eq!(psns(&pack_sar_batch(tid, &fragmentation, false)), vec![0, 1, 2]);

        fragmentation.confirm(2);
        assert_eq!(psns(&pack_sar_batch(tid, &fragmentation, false)), vec![3, 4, 5]);

        fragmentation.confirm(5);
        let last_batch = pack_sar_batch(tid, &fragmentation, true);
        assert_eq!(psns(&last_batch), vec![6, 7]);
        assert!(matches!(&last_batch[1], WtpPdu::SegmentedResult(s) if s.ttr && s.rid));

        fragmentation.confirm(7);
        assert!(pack_sar_batch(tid, &fragmentation, false).is_empty());
    }

    #[test]
    fn test_pack_sar_result_rid() {
        let fragmentation = Fragmentation::new(Bytes::from(vec![7u8; 45]), 10, 2).unwrap();
        let WtpPdu::SegmentedResult(pdu) = pack_sar_result(Tid::from_raw(1), &fragmentation, 2, true).pdu else {
            panic!("expected a segmented result");
        };
        assert!(pdu.rid);
        assert_eq!(pdu.user_data.len(), 10);
    }
}
