use crate::pdu::TransactionClass;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum InitiatorState {
    Null,
    ResultWait,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InitiatorTrigger {
    TrInvokeReq { tcl: TransactionClass },
    TrAbortReq,
    RcvAck { tid_ok: bool },
    RcvNegativeAck,
    RcvAbort,
    RcvErrorPdu,
    TimerToA,
    TimerToR,
    TimerToW,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct InitiatorGuards {
    pub rcr_exhausted: bool,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InitiatorAction {
    SendUnreliableInvoke,
    SendInvoke,
    ConfirmTid,
    ConfirmInvoke,
    ResendInvoke,
    AbortNoResponse,
    IndicateAbort,
    AbortByUser,
    AbortProtocolError,
    RejectPrimitive,
    Ignore,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Row {
    pub action: InitiatorAction,
    pub next: InitiatorState,
}

fn row(action: InitiatorAction, next: InitiatorState) -> Option<Row> {
    Some(Row { action, next })
}

/// In `Null`, only an invoke request has a row. `ResultWait` handles every trigger.
pub fn transition(state: InitiatorState, trigger: InitiatorTrigger, g: &InitiatorGuards) -> Option<Row> {
    use InitiatorState::*;
    use InitiatorTrigger as T;
    use InitiatorAction as A;

    match (state, trigger) {
        (Null, T::TrInvokeReq { tcl: TransactionClass::Class0 }) => row(A::SendUnreliableInvoke, Null),
        (Null, T::TrInvokeReq { .. }) => row(A::SendInvoke, ResultWait),
        (Null, _) => None,

        (ResultWait, T::RcvAck { tid_ok: true }) => row(A::ConfirmTid, ResultWait),
        (ResultWait, T::RcvAck { tid_ok: false }) => row(A::ConfirmInvoke, Null),
        (ResultWait, T::TimerToR) if !g.rcr_exhausted => row(A::ResendInvoke, ResultWait),
        (ResultWait, T::TimerToR) => row(A::AbortNoResponse, Null),
        (ResultWait, T::RcvAbort) => row(A::IndicateAbort, Null),
        (ResultWait, T::TrAbortReq) => row(A::AbortByUser, Null),
        (ResultWait, T::RcvErrorPdu) => row(A::AbortProtocolError, Null),
        (ResultWait, T::TrInvokeReq { .. }) => row(A::RejectPrimitive, ResultWait),
        (ResultWait, T::RcvNegativeAck | T::TimerToA | T::TimerToW) => row(A::Ignore, ResultWait),
    }
}
