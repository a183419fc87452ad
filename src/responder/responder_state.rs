//! The responder's transition table as a pure function: given a state, the event that triggers
//!  a transition and the guard conditions derived from the machine, it yields the action to
//!  perform and the next state.

use crate::pdu::TransactionClass;
use crate::tid_cache::TidValidation;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ResponderState {
    /// initial and terminal state; a machine that returns here is destroyed
    Listen,
    /// waiting for the initiator to confirm a tid we could not validate
    TidOkWait,
    /// waiting for the application to accept the invoke
    InvokeRespWait,
    /// class 2: waiting for the application's result
    ResultWait,
    /// class 2: waiting for the initiator to acknowledge the result
    ResultRespWait,
    /// class 1: holding on to the transaction so that retransmitted invokes are re-acknowledged
    WaitTimeout,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ResponderTrigger {
    /// `tid_check` is only evaluated for class 1 and 2 invokes in `Listen`
    RcvInvoke { rid: bool, tcl: TransactionClass, tid_check: Option<TidValidation> },
    RcvAck { tid_ok: bool },
    RcvNegativeAck,
    RcvAbort,
    RcvErrorPdu,
    TrInvokeRes,
    TrResultReq,
    TrAbortReq,
    TimerToA,
    TimerToR,
    TimerToW,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ResponderGuards {
    pub tcl: TransactionClass,
    pub u_ack: bool,
    pub ack_pdu_sent: bool,
    pub aec_exhausted: bool,
    pub rcr_exhausted: bool,
    pub segmented_result: bool,
    /// for acks: the ack covers the complete result
    pub result_confirmed: bool,
    /// for acks: the ack confirms segments of a segmented result that were not confirmed before
    pub sar_progress: bool,
    /// for result requests: the result cannot be segmented
    pub result_too_large: bool,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ResponderAction {
    /// class 0: just pass the invoke up
    IndicateInvoke,
    AcceptInvoke,
    VerifyTid,
    DropReplay,
    ResendTidVerification,
    IndicateVerifiedInvoke,
    Ignore,
    RejectPrimitive,
    Expire,
    SendProtocolErrorAbort,
    IndicateAbort,
    AbortProtocolError,
    AbortByUser,
    ResendAck,
    AwaitResult,
    AckAndWait,
    AckForResult,
    RetryAck,
    AbortNoResponse,
    SendResult,
    AbortMessageTooLarge,
    ConfirmResult,
    ContinueSarResult,
    ResendSarResult,
    ResendResult,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Row {
    pub action: ResponderAction,
    pub next: ResponderState,
}

fn row(action: ResponderAction, next: ResponderState) -> Option<Row> {
    Some(Row { action, next })
}

/// `None` means there is no row for the combination, which is a modeling bug rather than a
///  protocol situation. All states except `Listen` handle every trigger.
pub fn transition(state: ResponderState, trigger: ResponderTrigger, g: &ResponderGuards) -> Option<Row> {
    use ResponderState::*;
    use ResponderTrigger as T;
    use ResponderAction as A;
    use TransactionClass::*;

    match (state, trigger) {
        (Listen, T::RcvInvoke { tcl: Class0, .. }) => row(A::IndicateInvoke, Listen),
        (Listen, T::RcvInvoke { tid_check: Some(TidValidation::Ok | TidValidation::TidNew), .. }) => row(A::AcceptInvoke, InvokeRespWait),
        (Listen, T::RcvInvoke { tid_check: Some(TidValidation::NoCachedTid), .. }) => row(A::VerifyTid, TidOkWait),
        (Listen, T::RcvInvoke { tid_check: Some(TidValidation::OutOfWindow), .. }) => row(A::DropReplay, Listen),
        (Listen, T::RcvErrorPdu) => row(A::SendProtocolErrorAbort, Listen),
        // the peer gave up on a segmented invoke
        (Listen, T::RcvAbort) => row(A::Expire, Listen),
        // abandoned segmented invoke
        (Listen, T::TimerToW) => row(A::Expire, Listen),
        (Listen, _) => None,

        (TidOkWait, T::RcvInvoke { rid: true, .. }) => row(A::ResendTidVerification, TidOkWait),
        (TidOkWait, T::RcvInvoke { rid: false, .. }) => row(A::Ignore, TidOkWait),
        (TidOkWait, T::RcvAck { tid_ok: true }) => row(A::IndicateVerifiedInvoke, InvokeRespWait),
        (TidOkWait, T::RcvAck { tid_ok: false }) => row(A::Ignore, TidOkWait),
        (TidOkWait, T::RcvNegativeAck) => row(A::Ignore, TidOkWait),
        // the application never saw this transaction, so there is nobody to tell
        (TidOkWait, T::RcvAbort) => row(A::Ignore, Listen),
        (TidOkWait, T::RcvErrorPdu) => row(A::SendProtocolErrorAbort, Listen),
        (TidOkWait, T::TrInvokeRes | T::TrResultReq | T::TrAbortReq) => row(A::RejectPrimitive, TidOkWait),
        (TidOkWait, T::TimerToW) => row(A::Expire, Listen),
        (TidOkWait, T::TimerToA | T::TimerToR) => row(A::Ignore, TidOkWait),

        (InvokeRespWait | ResultWait | ResultRespWait | WaitTimeout, T::RcvAbort) => row(A::IndicateAbort, Listen),
        (InvokeRespWait | ResultWait | ResultRespWait | WaitTimeout, T::RcvErrorPdu) => row(A::AbortProtocolError, Listen),
        (InvokeRespWait | ResultWait | ResultRespWait | WaitTimeout, T::TrAbortReq) => row(A::AbortByUser, Listen),

        (InvokeRespWait | ResultWait | WaitTimeout, T::RcvInvoke { rid: true, .. }) if g.ack_pdu_sent => row(A::ResendAck, state),
        (InvokeRespWait | ResultWait | ResultRespWait | WaitTimeout, T::RcvInvoke { .. }) => row(A::Ignore, state),
        (InvokeRespWait | ResultWait | WaitTimeout, T::RcvAck { .. } | T::RcvNegativeAck) => row(A::Ignore, state),

        (InvokeRespWait, T::TrInvokeRes) if g.tcl == Class2 => row(A::AwaitResult, ResultWait),
        (InvokeRespWait, T::TrInvokeRes) => row(A::AckAndWait, WaitTimeout),
        (InvokeRespWait, T::TrResultReq) if g.tcl != Class2 => row(A::RejectPrimitive, InvokeRespWait),
        (InvokeRespWait | ResultWait, T::TrResultReq) if g.result_too_large => row(A::AbortMessageTooLarge, Listen),
        (InvokeRespWait | ResultWait, T::TrResultReq) => row(A::SendResult, ResultRespWait),
        (InvokeRespWait, T::TimerToA) if g.u_ack && !g.aec_exhausted => row(A::RetryAck, InvokeRespWait),
        (InvokeRespWait, T::TimerToA) if g.u_ack => row(A::AbortNoResponse, Listen),
        (InvokeRespWait, T::TimerToA) if g.tcl == Class2 => row(A::AckForResult, ResultWait),
        (InvokeRespWait, T::TimerToA) => row(A::AckAndWait, WaitTimeout),
        (InvokeRespWait, T::TimerToR | T::TimerToW) => row(A::Ignore, InvokeRespWait),

        (ResultWait, T::TrInvokeRes) => row(A::RejectPrimitive, ResultWait),
        (ResultWait, T::TimerToA) if !g.ack_pdu_sent => row(A::AckForResult, ResultWait),
        (ResultWait, T::TimerToA | T::TimerToR | T::TimerToW) => row(A::Ignore, ResultWait),

        (ResultRespWait, T::RcvAck { .. }) if g.result_confirmed => row(A::ConfirmResult, Listen),
        (ResultRespWait, T::RcvAck { .. }) if g.sar_progress => row(A::ContinueSarResult, ResultRespWait),
        (ResultRespWait, T::RcvAck { .. }) => row(A::Ignore, ResultRespWait),
        (ResultRespWait, T::RcvNegativeAck) if g.segmented_result => row(A::ResendSarResult, ResultRespWait),
        (ResultRespWait, T::RcvNegativeAck) => row(A::Ignore, ResultRespWait),
        (ResultRespWait, T::TrInvokeRes | T::TrResultReq) => row(A::RejectPrimitive, ResultRespWait),
        (ResultRespWait, T::TimerToR) if !g.rcr_exhausted => row(A::ResendResult, ResultRespWait),
        (ResultRespWait, T::TimerToR) => row(A::AbortNoResponse, Listen),
        (ResultRespWait, T::TimerToA | T::TimerToW) => row(A::Ignore, ResultRespWait),

        (WaitTimeout, T::TrInvokeRes | T::TrResultReq) => row(A::RejectPrimitive, WaitTimeout),
        (WaitTimeout, T::TimerToW) => row(A::Expire, Listen),
        (WaitTimeout, T::TimerToA | T::TimerToR) => row(A::Ignore, WaitTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ResponderState::*;
    use ResponderAction as A;
    use ResponderTrigger as T;

    const ALL_CLASSES: [TransactionClass; 3] = [TransactionClass::Class0, TransactionClass::Class1, TransactionClass::Class2];
    const ALL_TID_CHECKS: [Option<TidValidation>; 5] = [None, Some(TidValidation::Ok), Some(TidValidation::NoCachedTid), Some(TidValidation::OutOfWindow), Some(TidValidation::TidNew)];

    fn all_triggers() -> Vec<ResponderTrigger> {
        let mut result = vec![
            T::RcvAck { tid_ok: false },
            T::RcvAck { tid_ok: true },
            T::RcvNegativeAck,
            T::RcvAbort,
            T::RcvErrorPdu,
            T::TrInvokeRes,
            T::TrResultReq,
            T::TrAbortReq,
            T::TimerToA,
            T::TimerToR,
            T::TimerToW,
        ];
        for rid in [false, true] {
            for tcl in ALL_CLASSES {
                for tid_check in ALL_TID_CHECKS {
                    result.push(T::RcvInvoke { rid, tcl, tid_check });
                }
            }
        }
        result
    }

    fn all_guards() -> Vec<ResponderGuards> {
        let mut result = Vec::new();
        for tcl in ALL_CLASSES {
            for bits in 0..(1u32 << 8) {
                let bit = |n: u32| bits & (1 << n) != 0;
                result.push(ResponderGuards {
                    tcl,
                    u_ack: bit(0),
                    ack_pdu_sent: bit(1),
                    aec_exhausted: bit(2),
                    rcr_exhausted: bit(3),
                    segmented_result: bit(4),
                    result_confirmed: bit(5),
                    result_too_large: bit(6),
                    sar_progress: bit(7),
                });
            }
        }
        result
    }

    fn guards(tcl: TransactionClass) -> ResponderGuards {
        ResponderGuards {
            tcl,
            u_ack: false,
            ack_pdu_sent: false,
            aec_exhausted: false,
            rcr_exhausted: false,
            segmented_result: false,
            result_confirmed: true,
            sar_progress: false,
            result_too_large: false,
        }
    }

    #[test]
    fn test_active_states_handle_every_event() {
        for state in [TidOkWait, InvokeRespWait, ResultWait, ResultRespWait, WaitTimeout] {
            for trigger in all_triggers() {
                for g in all_guards() {
                    assert!(transition(state, trigger, &g).is_some(), "no row for {:?} / {:?} / {:?}", state, trigger, g);
                }
            }
        }
    }

    #[test]
    fn test_listen_handles_every_invoke() {
        for tcl in ALL_CLASSES {
            let checks: &[Option<TidValidation>] = if tcl == TransactionClass::Class0 { &[None] } else { &ALL_TID_CHECKS[1..] };
            for &tid_check in checks {
                for rid in [false, true] {
                    for g in all_guards() {
                        assert!(transition(Listen, T::RcvInvoke { rid, tcl, tid_check }, &g).is_some());
                    }
                }
            }
        }
    }

    #[rstest]
    #[case::class_0(TransactionClass::Class0, None, A::IndicateInvoke, Listen)]
    #[case::class_2_ok(TransactionClass::Class2, Some(TidValidation::Ok), A::AcceptInvoke, InvokeRespWait)]
    #[case::class_1_tid_new(TransactionClass::Class1, Some(TidValidation::TidNew), A::AcceptInvoke, InvokeRespWait)]
    #[case::no_cached_tid(TransactionClass::Class2, Some(TidValidation::NoCachedTid), A::VerifyTid, TidOkWait)]
    #[case::replay(TransactionClass::Class2, Some(TidValidation::OutOfWindow), A::DropReplay, Listen)]
    fn test_listen_invoke(#[case] tcl: TransactionClass, #[case] tid_check: Option<TidValidation>, #[case] action: ResponderAction, #[case] next: ResponderState) {
        assert_eq!(transition(Listen, T::RcvInvoke { rid: false, tcl, tid_check }, &guards(tcl)), Some(Row { action, next }));
    }

    #[rstest]
    #[case::ack(T::RcvAck { tid_ok: false })]
    #[case::result_req(T::TrResultReq)]
    #[case::timer_a(T::TimerToA)]
    fn test_listen_has_no_row(#[case] trigger: ResponderTrigger) {
        assert_eq!(transition(Listen, trigger, &guards(TransactionClass::Class2)), None);
    }

    #[rstest]
    #[case::user_ack_pending(true, false, TransactionClass::Class2, A::RetryAck, InvokeRespWait)]
    #[case::user_ack_exhausted(true, true, TransactionClass::Class2, A::AbortNoResponse, Listen)]
    #[case::class_2_implicit_ack(false, false, TransactionClass::Class2, A::AckForResult, ResultWait)]
    #[case::class_1_implicit_ack(false, false, TransactionClass::Class1, A::AckAndWait, WaitTimeout)]
    fn test_invoke_resp_wait_timer_a(#[case] u_ack: bool, #[case] aec_exhausted: bool, #[case] tcl: TransactionClass, #[case] action: ResponderAction, #[case] next: ResponderState) {
        let g = ResponderGuards { u_ack, aec_exhausted, ..guards(tcl) };
        assert_eq!(transition(InvokeRespWait, T::TimerToA, &g), Some(Row { action, next }));
    }

    #[test]
    fn test_listen_abort_discards_reassembly() {
        assert_eq!(transition(Listen, T::RcvAbort, &guards(TransactionClass::Class2)), Some(Row { action: A::Expire, next: Listen }));
    }

    #[rstest]
    #[case::confirmed(true, true, A::ConfirmResult, Listen)]
    #[case::more_segments(false, true, A::ContinueSarResult, ResultRespWait)]
    #[case::repeated_ack(false, false, A::Ignore, ResultRespWait)]
    fn test_result_resp_wait_ack(#[case] result_confirmed: bool, #[case] sar_progress: bool, #[case] action: ResponderAction, #[case] next: ResponderState) {
        let g = ResponderGuards { result_confirmed, sar_progress, segmented_result: true, ..guards(TransactionClass::Class2) };
        assert_eq!(transition(ResultRespWait, T::RcvAck { tid_ok: false }, &g), Some(Row { action, next }));
    }

    #[rstest]
    #[case::retry(false, A::ResendResult, ResultRespWait)]
    #[case::exhausted(true, A::AbortNoResponse, Listen)]
    fn test_result_resp_wait_timer_r(#[case] rcr_exhausted: bool, #[case] action: ResponderAction, #[case] next: ResponderState) {
        let g = ResponderGuards { rcr_exhausted, ..guards(TransactionClass::Class2) };
        assert_eq!(transition(ResultRespWait, T::TimerToR, &g), Some(Row { action, next }));
    }

    #[rstest]
    #[case::invoke_resp_wait(InvokeRespWait, false, A::Ignore)]
    #[case::result_wait_ack_sent(ResultWait, true, A::ResendAck)]
    #[case::result_wait_no_ack(ResultWait, false, A::Ignore)]
    #[case::wait_timeout(WaitTimeout, true, A::ResendAck)]
    #[case::result_resp_wait(ResultRespWait, true, A::Ignore)]
    fn test_retransmitted_invoke(#[case] state: ResponderState, #[case] ack_pdu_sent: bool, #[case] action: ResponderAction) {
        let g = ResponderGuards { ack_pdu_sent, ..guards(TransactionClass::Class2) };
        let trigger = T::RcvInvoke { rid: true, tcl: TransactionClass::Class2, tid_check: None };
        assert_eq!(transition(state, trigger, &g), Some(Row { action, next: state }));
    }
}
