//! Typed representation of WTP PDUs.
//!
//! The byte level format lives behind [PduCodec] - the engine only ever deals with these typed
//!  PDUs. Tids in PDUs are exactly what goes on the wire, i.e. PDUs we send carry the SendTID.

use bytes::{Bytes, BytesMut};
#[cfg(test)] use mockall::automock;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::tid::Tid;

#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum PduType {
    Invoke = 1,
    Result = 2,
    Ack = 3,
    Abort = 4,
    SegmentedInvoke = 5,
    SegmentedResult = 6,
    NegativeAck = 7,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum TransactionClass {
    /// unreliable invoke, no result
    Class0 = 0,
    /// reliable invoke, no result
    Class1 = 1,
    /// reliable invoke with reliable result
    Class2 = 2,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum AckType {
    Acknowledgement = 0,
    /// TIDve on the responder side, TIDok on the initiator side
    TidVerification = 1,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum AbortType {
    Provider = 0,
    User = 1,
}

/// Provider abort reasons. User abort reasons are defined by the layer above, so PDUs carry
///  the reason as a plain `u8`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum AbortReason {
    Unknown = 0x00,
    ProtoErr = 0x01,
    InvalidTid = 0x02,
    NotImplementedCl2 = 0x03,
    NotImplementedSar = 0x04,
    NotImplementedUAck = 0x05,
    WtpVersionZero = 0x06,
    CapTempExceeded = 0x07,
    NoResponse = 0x08,
    MessageTooLarge = 0x09,
    NotImplementedESar = 0x0A,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InvokePdu {
    pub tid: Tid,
    /// group trailer
    pub gtr: bool,
    /// transmission trailer
    pub ttr: bool,
    /// retransmission indicator
    pub rid: bool,
    pub version: u8,
    pub tid_new: bool,
    /// user acknowledgement requested
    pub u_ack: bool,
    pub tcl: TransactionClass,
    pub no_cache_supported: bool,
    pub user_data: Bytes,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResultPdu {
    pub tid: Tid,
    pub gtr: bool,
    pub ttr: bool,
    pub rid: bool,
    pub user_data: Bytes,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AckPdu {
    pub tid: Tid,
    pub ack_type: AckType,
    pub rid: bool,
    /// packet sequence number TPI, present when acknowledging a SAR segment
    pub psn: Option<u8>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AbortPdu {
    pub tid: Tid,
    pub abort_type: AbortType,
    pub reason: u8,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SegmentPdu {
    pub tid: Tid,
    pub gtr: bool,
    pub ttr: bool,
    pub rid: bool,
    pub psn: u8,
    pub user_data: Bytes,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NegativeAckPdu {
    pub tid: Tid,
    pub rid: bool,
    pub missing: Vec<u8>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum WtpPdu {
    Invoke(InvokePdu),
    Result(ResultPdu),
    Ack(AckPdu),
    Abort(AbortPdu),
    SegmentedInvoke(SegmentPdu),
    SegmentedResult(SegmentPdu),
    NegativeAck(NegativeAckPdu),
}

impl WtpPdu {
    pub fn pdu_type(&self) -> PduType {
        match self {
            WtpPdu::Invoke(_) => PduType::Invoke,
            WtpPdu::Result(_) => PduType::Result,
            WtpPdu::Ack(_) => PduType::Ack,
            WtpPdu::Abort(_) => PduType::Abort,
            WtpPdu::SegmentedInvoke(_) => PduType::SegmentedInvoke,
            WtpPdu::SegmentedResult(_) => PduType::SegmentedResult,
            WtpPdu::NegativeAck(_) => PduType::NegativeAck,
        }
    }

    pub fn tid(&self) -> Tid {
        match self {
            WtpPdu::Invoke(pdu) => pdu.tid,
            WtpPdu::Result(pdu) => pdu.tid,
            WtpPdu::Ack(pdu) => pdu.tid,
            WtpPdu::Abort(pdu) => pdu.tid,
            WtpPdu::SegmentedInvoke(pdu) => pdu.tid,
            WtpPdu::SegmentedResult(pdu) => pdu.tid,
            WtpPdu::NegativeAck(pdu) => pdu.tid,
        }
    }

    /// Marks the PDU as a retransmission. Abort PDUs have no rid flag and are left unchanged.
    pub fn set_rid(&mut self) {
        match self {
            WtpPdu::Invoke(pdu) => pdu.rid = true,
            WtpPdu::Result(pdu) => pdu.rid = true,
            WtpPdu::Ack(pdu) => pdu.rid = true,
            WtpPdu::Abort(_) => {}
            WtpPdu::SegmentedInvoke(pdu) => pdu.rid = true,
            WtpPdu::SegmentedResult(pdu) => pdu.rid = true,
            WtpPdu::NegativeAck(pdu) => pdu.rid = true,
        }
    }
}

/// The byte level PDU format, abstracted away from the engine.
///
/// `decode` is passed exactly one PDU (concatenated datagrams are split before), and fails for
///  anything it cannot make sense of. Unknown PDU types, on the other hand, are reported as an
///  error by the caller based on the type octet, so a codec need not handle them.
#[cfg_attr(test, automock)]
pub trait PduCodec: Send + Sync + 'static {
    fn decode(&self, buf: &[u8]) -> anyhow::Result<WtpPdu>;

    fn encode(&self, pdu: &WtpPdu, buf: &mut BytesMut);
}
