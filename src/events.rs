use std::fmt::{Display, Formatter};
use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::addr_tuple::AddrTuple;
use crate::pdu::{AbortType, TransactionClass};
use crate::tid::Tid;
use crate::timers::Elapsed;

/// Opaque handle of a machine, used by the application layer and by timers to address a
///  machine without knowing its tid.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Debug)]
pub struct MachineId(u64);

impl MachineId {
    pub const fn from_raw(raw: u64) -> MachineId {
        MachineId(raw)
    }

    pub fn to_raw(&self) -> u64 {
        self.0
    }
}

impl Display for MachineId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TimerKind {
    /// acknowledgement interval
    A,
    /// retry interval
    R,
    /// wait timeout
    W,
}

/// The event a machine's timer delivers when it elapses
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TimerEvent {
    pub kind: TimerKind,
    pub handle: MachineId,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RcvInvokeData {
    pub addr: AddrTuple,
    pub tid: Tid,
    pub tcl: TransactionClass,
    pub u_ack: bool,
    pub gtr: bool,
    pub ttr: bool,
    pub rid: bool,
    pub tid_new: bool,
    pub no_cache_supported: bool,
    pub version: u8,
    pub user_data: Bytes,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RcvSegInvokeData {
    pub addr: AddrTuple,
    pub tid: Tid,
    pub gtr: bool,
    pub ttr: bool,
    pub rid: bool,
    pub psn: u8,
    pub user_data: Bytes,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RcvAckData {
    pub addr: AddrTuple,
    pub tid: Tid,
    /// TIDve / TIDok flag
    pub tid_ok: bool,
    pub rid: bool,
    pub psn: Option<u8>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RcvNegativeAckData {
    pub addr: AddrTuple,
    pub tid: Tid,
    pub rid: bool,
    pub missing: Vec<u8>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RcvAbortData {
    pub addr: AddrTuple,
    pub tid: Tid,
    pub abort_type: AbortType,
    pub reason: u8,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RcvErrorPduData {
    pub addr: AddrTuple,
    pub tid: Tid,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TrInvokeReqData {
    pub handle: MachineId,
    pub addr: AddrTuple,
    pub tcl: TransactionClass,
    pub u_ack: bool,
    pub user_data: Bytes,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TrInvokeResData {
    pub handle: MachineId,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TrResultReqData {
    pub handle: MachineId,
    pub user_data: Bytes,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TrAbortReqData {
    pub handle: MachineId,
    pub abort_type: AbortType,
    pub reason: u8,
}

/// Everything a machine set's worker consumes: unpacked PDUs from the network, primitives from
///  the application, and elapsed timers.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum WtpEvent {
    RcvInvoke(RcvInvokeData),
    RcvSegInvoke(RcvSegInvokeData),
    RcvAck(RcvAckData),
    RcvNegativeAck(RcvNegativeAckData),
    RcvAbort(RcvAbortData),
    RcvErrorPdu(RcvErrorPduData),
    TrInvokeReq(TrInvokeReqData),
    TrInvokeRes(TrInvokeResData),
    TrResultReq(TrResultReqData),
    TrAbortReq(TrAbortReqData),
    Timeout(Elapsed),
}

impl WtpEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WtpEvent::RcvInvoke(_) => "RcvInvoke",
            WtpEvent::RcvSegInvoke(_) => "RcvSegInvoke",
            WtpEvent::RcvAck(_) => "RcvAck",
            WtpEvent::RcvNegativeAck(_) => "RcvNegativeAck",
            WtpEvent::RcvAbort(_) => "RcvAbort",
            WtpEvent::RcvErrorPdu(_) => "RcvErrorPdu",
            WtpEvent::TrInvokeReq(_) => "TR_Invoke_Req",
            WtpEvent::TrInvokeRes(_) => "TR_Invoke_Res",
            WtpEvent::TrResultReq(_) => "TR_Result_Req",
            WtpEvent::TrAbortReq(_) => "TR_Abort_Req",
            WtpEvent::Timeout(elapsed) => match elapsed.event.kind {
                TimerKind::A => "TimerTO_A",
                TimerKind::R => "TimerTO_R",
                TimerKind::W => "TimerTO_W",
            },
        }
    }

    /// The (address tuple, tid) key for events that arrive from the network
    pub fn network_key(&self) -> Option<(AddrTuple, Tid)> {
        match self {
            WtpEvent::RcvInvoke(data) => Some((data.addr, data.tid)),
            WtpEvent::RcvSegInvoke(data) => Some((data.addr, data.tid)),
            WtpEvent::RcvAck(data) => Some((data.addr, data.tid)),
            WtpEvent::RcvNegativeAck(data) => Some((data.addr, data.tid)),
            WtpEvent::RcvAbort(data) => Some((data.addr, data.tid)),
            WtpEvent::RcvErrorPdu(data) => Some((data.addr, data.tid)),
            _ => None,
        }
    }

    /// The machine handle for locally originated events
    pub fn handle(&self) -> Option<MachineId> {
        match self {
            WtpEvent::TrInvokeReq(data) => Some(data.handle),
            WtpEvent::TrInvokeRes(data) => Some(data.handle),
            WtpEvent::TrResultReq(data) => Some(data.handle),
            WtpEvent::TrAbortReq(data) => Some(data.handle),
            WtpEvent::Timeout(elapsed) => Some(elapsed.event.handle),
            _ => None,
        }
    }
}

impl From<Elapsed> for WtpEvent {
    fn from(value: Elapsed) -> Self {
        WtpEvent::Timeout(value)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum IndicationSource {
    Initiator = 0,
    Responder = 1,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TrInvokeIndData {
    pub handle: MachineId,
    pub addr: AddrTuple,
    pub tcl: TransactionClass,
    pub u_ack: bool,
    pub user_data: Bytes,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TrInvokeCnfData {
    pub handle: MachineId,
    pub addr: AddrTuple,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TrResultCnfData {
    pub handle: MachineId,
    pub addr: AddrTuple,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TrAbortIndData {
    pub handle: MachineId,
    pub addr: AddrTuple,
    pub source: IndicationSource,
    pub abort_type: AbortType,
    pub reason: u8,
}

/// Events the engine surfaces to the session / application layer
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum WtpIndication {
    TrInvokeInd(TrInvokeIndData),
    TrInvokeCnf(TrInvokeCnfData),
    TrResultCnf(TrResultCnfData),
    TrAbortInd(TrAbortIndData),
}

impl WtpIndication {
    pub fn handle(&self) -> MachineId {
        match self {
            WtpIndication::TrInvokeInd(data) => data.handle,
            WtpIndication::TrInvokeCnf(data) => data.handle,
            WtpIndication::TrResultCnf(data) => data.handle,
            WtpIndication::TrAbortInd(data) => data.handle,
        }
    }
}
