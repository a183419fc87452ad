use std::sync::Arc;
use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};
use crate::addr_tuple::AddrTuple;
use crate::config::WtpConfig;
use crate::events::*;
use crate::output::WtpOutput;
use crate::pack::{pack_abort, pack_ack, pack_negative_ack, pack_result, pack_sar_ack, pack_sar_batch, pack_sar_result};
use crate::pdu::{AbortReason, AbortType, AckType, TransactionClass, WtpPdu};
use crate::registry::{Lifecycle, Machine};
use crate::responder::responder_state::{transition, ResponderAction, ResponderGuards, ResponderState, ResponderTrigger};
use crate::sar::{Fragmentation, Reassembly};
use crate::tid::Tid;
use crate::tid_cache::TidCache;
use crate::timers::Timer;

/// What all responder machines share
pub struct ResponderContext {
    pub config: Arc<WtpConfig>,
    pub output: WtpOutput,
    pub tid_cache: Arc<TidCache>,
}

/// One transaction on the responder side
pub struct ResponderMachine {
    handle: MachineId,
    addr: AddrTuple,
    tid: Tid,
    state: ResponderState,
    tcl: TransactionClass,
    u_ack: bool,
    /// acknowledgement expiration counter, for user acks that take too long
    aec: u8,
    /// retransmission counter for results
    rcr: u8,
    ack_pdu_sent: bool,
    /// the initiator is able to deal with segmented results
    sar_enabled: bool,
    timer: Timer<WtpEvent>,
    /// an invoke indication held back until the initiator confirmed the tid
    pending_indication: Option<TrInvokeIndData>,
    result: Option<WtpPdu>,
    reassembly: Option<Reassembly>,
    fragmentation: Option<Fragmentation>,
}

impl Machine for ResponderMachine {
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

impl ResponderMachine {
    pub fn new(handle: MachineId, addr: AddrTuple, tid: Tid, tcl: TransactionClass, u_ack: bool, sar_enabled: bool, timer: Timer<WtpEvent>) -> ResponderMachine {
        ResponderMachine {
            handle,
            addr,
            tid,
            state: ResponderState::Listen,
            tcl,
            u_ack,
            aec: 0,
            rcr: 0,
            ack_pdu_sent: false,
            sar_enabled,
            timer,
            pending_indication: None,
            result: None,
            reassembly: None,
            fragmentation: None,
        }
    }

    pub fn state(&self) -> ResponderState {
        self.state
    }

    pub fn destroy(self) {
        self.timer.destroy();
    }

    pub fn handle_event(&mut self, event: WtpEvent, ctx: &ResponderContext) -> Lifecycle {
        if let WtpEvent::Timeout(elapsed) = &event {
            if !self.timer.accept(elapsed) {
                trace!("machine {}: stale {:?} - ignoring", self.handle, elapsed);
                return Lifecycle::Alive;
            }
        }

        let Some(event) = self.intercept_segmentation(event, ctx) else {
            return Lifecycle::Alive;
        };

        let Some(trigger) = self.trigger_for(&event, ctx) else {
            error!("machine {}: {} is not a responder event - ignoring", self.handle, event.name());
            return Lifecycle::Alive;
        };
        let guards = self.guards(&event, ctx);

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

        if self.state == ResponderState::Listen && self.reassembly.is_none() {
            Lifecycle::Finished
        }
        else {
            Lifecycle::Alive
        }
    }

    /// Segmented invokes are collected before the state table sees them: the table sees the
    ///  assembled invoke as if it had arrived in one piece.
    fn intercept_segmentation(&mut self, event: WtpEvent, ctx: &ResponderContext) -> Option<WtpEvent> {
        match event {
            WtpEvent::RcvInvoke(invoke) if self.state == ResponderState::Listen && !invoke.ttr => {
                if invoke.gtr {
                    ctx.output.send_pdu(self.addr, pack_sar_ack(self.tid, 0));
                }
                if self.reassembly.is_none() {
                    debug!("machine {}: first segment of a segmented invoke", self.handle);
                    self.reassembly = Some(Reassembly::start(invoke));
                }
                self.start_timer(TimerKind::W, ctx);
                None
            }
            WtpEvent::RcvSegInvoke(segment) => {
                let Some(reassembly) = &mut self.reassembly else {
                    info!("machine {}: segment {} outside of reassembly - dropping", self.handle, segment.psn);
                    return None;
                };

                if !reassembly.add_segment(segment.psn, segment.user_data, segment.ttr) {
                    debug!("machine {}: duplicate segment {}", self.handle, segment.psn);
                }

                if segment.gtr || segment.ttr {
                    let missing = reassembly.missing_psns(segment.psn);
                    if !missing.is_empty() {
                        debug!("machine {}: missing segments {:?}", self.handle, missing);
                        ctx.output.send_pdu(self.addr, pack_negative_ack(self.tid, missing));
                    }
                    else if segment.gtr {
                        ctx.output.send_pdu(self.addr, pack_sar_ack(self.tid, segment.psn));
                    }
                }

                match reassembly.assembled() {
                    Some(assembled) => {
                        debug!("machine {}: segmented invoke is complete ({} bytes)", self.handle, assembled.user_data.len());
                        self.reassembly = None;
                        self.timer.stop();
                        Some(WtpEvent::RcvInvoke(assembled))
                    }
                    None => {
                        self.start_timer(TimerKind::W, ctx);
                        None
                    }
                }
            }
            other => Some(other),
        }
    }

    fn trigger_for(&self, event: &WtpEvent, ctx: &ResponderContext) -> Option<ResponderTrigger> {
        let trigger = match event {
            WtpEvent::RcvInvoke(invoke) => {
                let tid_check = if self.state == ResponderState::Listen && invoke.tcl != TransactionClass::Class0 {
                    Some(ctx.tid_cache.validate(&invoke.addr, invoke.tid, invoke.tid_new, invoke.no_cache_supported))
                }
                else {
                    None
                };
                ResponderTrigger::RcvInvoke { rid: invoke.rid, tcl: invoke.tcl, tid_check }
            }
            WtpEvent::RcvAck(ack) => ResponderTrigger::RcvAck { tid_ok: ack.tid_ok },
            WtpEvent::RcvNegativeAck(_) => ResponderTrigger::RcvNegativeAck,
            WtpEvent::RcvAbort(_) => ResponderTrigger::RcvAbort,
            WtpEvent::RcvErrorPdu(_) => ResponderTrigger::RcvErrorPdu,
            WtpEvent::TrInvokeRes(_) => ResponderTrigger::TrInvokeRes,
            WtpEvent::TrResultReq(_) => ResponderTrigger::TrResultReq,
            WtpEvent::TrAbortReq(_) => ResponderTrigger::TrAbortReq,
            WtpEvent::Timeout(elapsed) => match elapsed.event.kind {
                TimerKind::A => ResponderTrigger::TimerToA,
                TimerKind::R => ResponderTrigger::TimerToR,
                TimerKind::W => ResponderTrigger::TimerToW,
            },
            WtpEvent::RcvSegInvoke(_) | WtpEvent::TrInvokeReq(_) => return None,
        };
        Some(trigger)
    }

    fn guards(&self, event: &WtpEvent, ctx: &ResponderContext) -> ResponderGuards {
        let (result_confirmed, sar_progress) = match (event, &self.fragmentation) {
            (WtpEvent::RcvAck(ack), Some(fragmentation)) => {
                let psn = ack.psn.unwrap_or(0);
                (fragmentation.is_confirmed(psn), fragmentation.is_progress(psn))
            }
            _ => (true, false),
        };
        let result_too_large = match event {
            WtpEvent::TrResultReq(req) if self.sar_enabled => {
                Fragmentation::new(req.user_data.clone(), ctx.config.sar_segment_size, ctx.config.sar_group_len).is_err()
            }
            _ => false,
        };

        ResponderGuards {
            tcl: self.tcl,
            u_ack: self.u_ack,
            ack_pdu_sent: self.ack_pdu_sent,
            aec_exhausted: self.aec >= ctx.config.aec_max,
            rcr_exhausted: self.rcr >= ctx.config.max_rcr,
            segmented_result: self.fragmentation.is_some(),
            result_confirmed,
            sar_progress,
            result_too_large,
        }
    }

    fn perform(&mut self, action: ResponderAction, event: &WtpEvent, ctx: &ResponderContext) {
        use ResponderAction as A;

        match (action, event) {
            (A::IndicateInvoke, WtpEvent::RcvInvoke(invoke)) => {
                ctx.output.indicate(WtpIndication::TrInvokeInd(self.invoke_indication(invoke)));
            }
            (A::AcceptInvoke, WtpEvent::RcvInvoke(invoke)) => {
                self.tcl = invoke.tcl;
                self.u_ack = invoke.u_ack;
                ctx.output.indicate(WtpIndication::TrInvokeInd(self.invoke_indication(invoke)));
                self.start_timer(TimerKind::A, ctx);
            }
            (A::VerifyTid, WtpEvent::RcvInvoke(invoke)) => {
                debug!("machine {}: no cached tid for {:?} - verifying tid {}", self.handle, self.addr, self.tid);
                self.tcl = invoke.tcl;
                self.u_ack = invoke.u_ack;
                self.pending_indication = Some(self.invoke_indication(invoke));
                self.send_ack(AckType::TidVerification, false, ctx);
                self.start_timer(TimerKind::W, ctx);
            }
            (A::DropReplay, _) => {
                info!("machine {}: tid {} from {:?} is outside the tid window - dropping invoke", self.handle, self.tid, self.addr);
            }
            (A::ResendTidVerification, _) => {
                self.send_ack(AckType::TidVerification, true, ctx);
            }
            (A::IndicateVerifiedInvoke, _) => {
                ctx.tid_cache.record_verified(&self.addr, self.tid);
                match self.pending_indication.take() {
                    Some(indication) => ctx.output.indicate(WtpIndication::TrInvokeInd(indication)),
                    None => warn!("machine {}: tid verified, but there is no pending invoke", self.handle),
                }
                self.start_timer(TimerKind::A, ctx);
            }
            (A::Ignore, _) => {
                trace!("machine {}: ignoring {} in state {:?}", self.handle, event.name(), self.state);
            }
            (A::RejectPrimitive, _) => {
                warn!("machine {}: {} is not allowed in state {:?} - ignoring", self.handle, event.name(), self.state);
            }
            (A::Expire, _) => {
                self.timer.stop();
                if self.reassembly.take().is_some() {
                    debug!("machine {}: discarding incomplete segmented invoke", self.handle);
                }
            }
            (A::SendProtocolErrorAbort, _) => {
                self.send_abort(AbortType::Provider, AbortReason::ProtoErr.into(), ctx);
            }
            (A::IndicateAbort, WtpEvent::RcvAbort(abort)) => {
                self.timer.stop();
                self.indicate_abort(abort.abort_type, abort.reason, ctx);
            }
            (A::AbortProtocolError, _) => {
                self.timer.stop();
                self.indicate_abort(AbortType::Provider, AbortReason::ProtoErr.into(), ctx);
                self.send_abort(AbortType::Provider, AbortReason::ProtoErr.into(), ctx);
            }
            (A::AbortByUser, WtpEvent::TrAbortReq(req)) => {
                self.timer.stop();
                self.send_abort(req.abort_type, req.reason, ctx);
            }
            (A::ResendAck, _) => {
                self.send_ack(AckType::Acknowledgement, true, ctx);
            }
            (A::AwaitResult, _) => {
                self.start_timer(TimerKind::A, ctx);
            }
            (A::AckAndWait, _) => {
                self.send_ack(AckType::Acknowledgement, false, ctx);
                self.ack_pdu_sent = true;
                self.start_timer(TimerKind::W, ctx);
            }
            (A::AckForResult, _) => {
                self.send_ack(AckType::Acknowledgement, false, ctx);
                self.ack_pdu_sent = true;
            }
            (A::RetryAck, _) => {
                self.aec += 1;
                trace!("machine {}: waiting for user ack, aec = {}", self.handle, self.aec);
                self.start_timer(TimerKind::A, ctx);
            }
            (A::AbortNoResponse, _) => {
                self.timer.stop();
                self.indicate_abort(AbortType::Provider, AbortReason::NoResponse.into(), ctx);
                self.send_abort(AbortType::Provider, AbortReason::NoResponse.into(), ctx);
            }
            (A::SendResult, WtpEvent::TrResultReq(req)) => {
                self.send_result(req.user_data.clone(), ctx);
            }
            (A::AbortMessageTooLarge, WtpEvent::TrResultReq(req)) => {
                warn!("machine {}: result of {} bytes can not be segmented - aborting", self.handle, req.user_data.len());
                self.timer.stop();
                self.indicate_abort(AbortType::Provider, AbortReason::MessageTooLarge.into(), ctx);
                self.send_abort(AbortType::Provider, AbortReason::MessageTooLarge.into(), ctx);
            }
            (A::ConfirmResult, _) => {
                self.timer.stop();
                ctx.output.indicate(WtpIndication::TrResultCnf(TrResultCnfData {
                    handle: self.handle,
                    addr: self.addr,
                }));
            }
            (A::ContinueSarResult, WtpEvent::RcvAck(ack)) => {
                let psn = ack.psn.unwrap_or(0);
                let advanced = self.fragmentation.as_mut()
                    .map_or(false, |f| f.confirm(psn));
                if !advanced {
                    debug!("machine {}: ack for segment {} confirms nothing new", self.handle, psn);
                    return;
                }
                self.rcr = 0;
                self.start_timer(TimerKind::R, ctx);
                self.send_next_batch(false, ctx);
            }
            (A::ResendSarResult, WtpEvent::RcvNegativeAck(nak)) => {
                self.start_timer(TimerKind::R, ctx);
                if nak.missing.is_empty() {
                    self.send_next_batch(true, ctx);
                }
                else if let Some(fragmentation) = &self.fragmentation {
                    for &psn in nak.missing.iter().filter(|&&psn| psn <= fragmentation.last_psn()) {
                        ctx.output.send_pdu(self.addr, pack_sar_result(self.tid, fragmentation, psn, true).pdu);
                    }
                }
            }
            (A::ResendResult, _) => {
                self.rcr += 1;
                debug!("machine {}: resending result, rcr = {}", self.handle, self.rcr);
                self.start_timer(TimerKind::R, ctx);
                if self.fragmentation.is_some() {
                    self.send_next_batch(true, ctx);
                }
                else if let Some(result) = &self.result {
                    let mut result = result.clone();
                    result.set_rid();
                    ctx.output.send_pdu(self.addr, result);
                }
            }
            (action, event) => {
                error!("machine {}: action {:?} does not apply to {} - ignoring", self.handle, action, event.name());
            }
        }
    }

    fn send_result(&mut self, user_data: Bytes, ctx: &ResponderContext) {
        self.rcr = 0;
        self.start_timer(TimerKind::R, ctx);

        if !self.sar_enabled {
            let result = pack_result(self.tid, user_data);
            self.result = Some(result.clone());
            ctx.output.send_pdu(self.addr, result);
            return;
        }

        match Fragmentation::new(user_data, ctx.config.sar_segment_size, ctx.config.sar_group_len) {
            Ok(fragmentation) => {
                debug!("machine {}: sending result in {} segments", self.handle, fragmentation.last_psn() as usize + 1);
                self.fragmentation = Some(fragmentation);
                self.send_next_batch(false, ctx);
            }
            Err(e) => {
                error!("machine {}: {}", self.handle, e);
            }
        }
    }

    /// Sends the segments after the last confirmed one, up to the next one that requires an ack
    fn send_next_batch(&mut self, rid: bool, ctx: &ResponderContext) {
        let Some(fragmentation) = &self.fragmentation else {
            return;
        };

        for pdu in pack_sar_batch(self.tid, fragmentation, rid) {
            self.result = Some(pdu.clone());
            ctx.output.send_pdu(self.addr, pdu);
        }
    }

    fn invoke_indication(&self, invoke: &RcvInvokeData) -> TrInvokeIndData {
        TrInvokeIndData {
            handle: self.handle,
            addr: self.addr,
            tcl: invoke.tcl,
            u_ack: invoke.u_ack,
            user_data: invoke.user_data.clone(),
        }
    }

    fn indicate_abort(&self, abort_type: AbortType, reason: u8, ctx: &ResponderContext) {
        ctx.output.indicate(WtpIndication::TrAbortInd(TrAbortIndData {
            handle: self.handle,
            addr: self.addr,
            source: IndicationSource::Responder,
            abort_type,
            reason,
        }));
    }

    fn send_ack(&self, ack_type: AckType, rid: bool, ctx: &ResponderContext) {
        ctx.output.send_pdu(self.addr, pack_ack(self.tid, ack_type, rid));
    }

    fn send_abort(&self, abort_type: AbortType, reason: u8, ctx: &ResponderContext) {
        ctx.output.send_pdu(self.addr, pack_abort(self.tid, abort_type, reason));
    }

    fn start_timer(&mut self, kind: TimerKind, ctx: &ResponderContext) {
        let interval = match kind {
            TimerKind::A => ctx.config.ack_interval(),
            TimerKind::R => ctx.config.retry_interval(),
            TimerKind::W => ctx.config.wait_timeout(),
        };
        self.timer.start(interval, Some(TimerEvent { kind, handle: self.handle }));
    }
}
