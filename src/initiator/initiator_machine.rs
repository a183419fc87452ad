use std::sync::Arc;
use tracing::{debug, error, trace, warn};
use crate::addr_tuple::AddrTuple;
use crate::config::WtpConfig;
use crate::events::*;
use crate::initiator::initiator_state::{transition, InitiatorAction, InitiatorGuards, InitiatorState, InitiatorTrigger};
use crate::output::WtpOutput;
use crate::pack::{pack_abort, pack_ack, pack_invoke};
use crate::pdu::{AbortReason, AbortType, AckType, TransactionClass, WtpPdu};
use crate::registry::{Lifecycle, Machine};
use crate::tid::Tid;
use crate::timers::Timer;

pub struct InitiatorContext {
    pub config: Arc<WtpConfig>,
    pub output: WtpOutput,
}

/// A locally initiated transaction. The tid is kept in RcvTID form, i.e. as the peer's acks and
///  aborts carry it.
pub struct InitiatorMachine {
    handle: MachineId,
    addr: AddrTuple,
    tid: Tid,
    tid_new: bool,
    state: InitiatorState,
    tcl: TransactionClass,
    u_ack: bool,
    rcr: u8,
    timer: Timer<WtpEvent>,
    invoke: Option<WtpPdu>,
}

impl Machine for InitiatorMachine {
    fn handle(&self) -> MachineId {
        self.handle
    }

    fn addr(&self) -> AddrTuple {
        self.addr
    }

    fn tid(&self) -> Tid {
        self.tid
    }
}

impl InitiatorMachine {
    pub fn new(req: &TrInvokeReqData, tid: Tid, tid_new: bool, timer: Timer<WtpEvent>) -> InitiatorMachine {
        InitiatorMachine {
            handle: req.handle,
            addr: req.addr,
            tid,
            tid_new,
            state: InitiatorState::Null,
            tcl: req.tcl,
            u_ack: req.u_ack,
            rcr: 0,
            timer,
            invoke: None,
        }
    }

    pub fn state(&self) -> InitiatorState {
        self.state
    }

    pub fn destroy(self) {
        self.timer.destroy();
    }

    pub fn handle_event(&mut self, event: WtpEvent, ctx: &InitiatorContext) -> Lifecycle {
        if let WtpEvent::Timeout(elapsed) = &event {
            if !self.timer.accept(elapsed) {
                trace!("machine {}: stale {:?} - ignoring", self.handle, elapsed);
                return Lifecycle::Alive;
            }
        }

        let Some(trigger) = trigger_for(&event) else {
            error!("machine {}: {} is not an initiator event - ignoring", self.handle, event.name());
            return Lifecycle::Alive;
        };
        let guards = InitiatorGuards {
            rcr_exhausted: self.rcr >= ctx.config.max_rcr,
        };

        let Some(row) = transition(self.state, trigger, &guards) else {
            error!("machine {}: unhandled event {} in state {:?}", self.handle, event.name(), self.state);
            return Lifecycle::Alive;
        };

        trace!("machine {}: {} in state {:?} -> {:?}", self.handle, event.name(), self.state, row.action);
        self.perform(row.action, &event, ctx);

        if row.next != self.state {
            debug!("machine {}: {:?} -> {:?}", self.handle, self.state, row.next);
            self.state = row.next;
        }

        match self.state {
            InitiatorState::Null => Lifecycle::Finished,
            InitiatorState::ResultWait => Lifecycle::Alive,
        }
    }

    fn perform(&mut self, action: InitiatorAction, event: &WtpEvent, ctx: &InitiatorContext) {
        use InitiatorAction as A;

        match (action, event) {
            (A::SendUnreliableInvoke, WtpEvent::TrInvokeReq(req)) => {
                ctx.output.send_pdu(self.addr, pack_invoke(self.tid, self.tcl, false, self.tid_new, req.user_data.clone()));
            }
            (A::SendInvoke, WtpEvent::TrInvokeReq(req)) => {
                let invoke = pack_invoke(self.tid, self.tcl, self.u_ack, self.tid_new, req.user_data.clone());
                self.invoke = Some(invoke.clone());
                ctx.output.send_pdu(self.addr, invoke);
                self.rcr = 0;
                self.start_retry_timer(ctx);
            }
            (A::ConfirmTid, _) => {
                debug!("machine {}: confirming tid {} to {:?}", self.handle, self.tid, self.addr);
                ctx.output.send_pdu(self.addr, pack_ack(self.tid, AckType::TidVerification, false));
                self.start_retry_timer(ctx);
            }
            (A::ConfirmInvoke, _) => {
                self.timer.stop();
                ctx.output.indicate(WtpIndication::TrInvokeCnf(TrInvokeCnfData {
                    handle: self.handle,
                    addr: self.addr,
                }));
            }
            (A::ResendInvoke, _) => {
                self.rcr += 1;
                debug!("machine {}: resending invoke, rcr = {}", self.handle, self.rcr);
                if let Some(invoke) = &self.invoke {
                    let mut invoke = invoke.clone();
                    invoke.set_rid();
                    ctx.output.send_pdu(self.addr, invoke);
                }
                self.start_retry_timer(ctx);
            }
            (A::AbortNoResponse, _) => {
                self.timer.stop();
                self.indicate_abort(AbortType::Provider, AbortReason::NoResponse.into(), ctx);
                ctx.output.send_pdu(self.addr, pack_abort(self.tid, AbortType::Provider, AbortReason::NoResponse));
            }
            (A::IndicateAbort, WtpEvent::RcvAbort(abort)) => {
                self.timer.stop();
                self.indicate_abort(abort.abort_type, abort.reason, ctx);
            }
            (A::AbortByUser, WtpEvent::TrAbortReq(req)) => {
                self.timer.stop();
                ctx.output.send_pdu(self.addr, pack_abort(self.tid, req.abort_type, req.reason));
            }
            (A::AbortProtocolError, _) => {
                self.timer.stop();
                self.indicate_abort(AbortType::Provider, AbortReason::ProtoErr.into(), ctx);
                ctx.output.send_pdu(self.addr, pack_abort(self.tid, AbortType::Provider, AbortReason::ProtoErr));
            }
            (A::RejectPrimitive, _) => {
                warn!("machine {}: {} is not allowed in state {:?} - ignoring", self.handle, event.name(), self.state);
            }
            (A::Ignore, _) => {
                trace!("machine {}: ignoring {} in state {:?}", self.handle, event.name(), self.state);
            }
            (action, event) => {
                error!("machine {}: action {:?} does not apply to {} - ignoring", self.handle, action, event.name());
            }
        }
    }

    fn indicate_abort(&self, abort_type: AbortType, reason: u8, ctx: &InitiatorContext) {
        ctx.output.indicate(WtpIndication::TrAbortInd(TrAbortIndData {
            handle: self.handle,
            addr: self.addr,
            source: IndicationSource::Initiator,
            abort_type,
            reason,
        }));
    }

    fn start_retry_timer(&mut self, ctx: &InitiatorContext) {
        let interval = ctx.config.initiator_retry_interval(self.u_ack);
        self.timer.start(interval, Some(TimerEvent { kind: TimerKind::R, handle: self.handle }));
    }
}

fn trigger_for(event: &WtpEvent) -> Option<InitiatorTrigger> {
    let trigger = match event {
        WtpEvent::TrInvokeReq(req) => InitiatorTrigger::TrInvokeReq { tcl: req.tcl },
        WtpEvent::TrAbortReq(_) => InitiatorTrigger::TrAbortReq,
        WtpEvent::RcvAck(ack) => InitiatorTrigger::RcvAck { tid_ok: ack.tid_ok },
        WtpEvent::RcvNegativeAck(_) => InitiatorTrigger::RcvNegativeAck,
        WtpEvent::RcvAbort(_) => InitiatorTrigger::RcvAbort,
        WtpEvent::RcvErrorPdu(_) => InitiatorTrigger::RcvErrorPdu,
        WtpEvent::Timeout(elapsed) => match elapsed.event.kind {
            TimerKind::A => InitiatorTrigger::TimerToA,
            TimerKind::R => InitiatorTrigger::TimerToR,
            TimerKind::W => InitiatorTrigger::TimerToW,
        },
        WtpEvent::RcvInvoke(_) | WtpEvent::RcvSegInvoke(_) | WtpEvent::TrInvokeRes(_) | WtpEvent::TrResultReq(_) => return None,
    };
    Some(trigger)
}
