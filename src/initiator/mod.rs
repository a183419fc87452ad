//! The initiator side of WTP: machines for transactions the local application starts.

pub mod initiator_state;
pub mod initiator_machine;

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, span, warn, Level};
use crate::config::WtpConfig;
use crate::events::{MachineId, TrInvokeReqData, WtpEvent};
use crate::initiator::initiator_machine::{InitiatorContext, InitiatorMachine};
use crate::output::WtpOutput;
use crate::pack::pack_abort;
use crate::pdu::{AbortReason, AbortType};
use crate::registry::{Lifecycle, MachineRegistry};
use crate::tid::TidGenerator;
use crate::timers::TimerService;

/// All initiator machines, owned by the initiator worker. Handles are chosen by the application
///  when it issues TR_Invoke_Req.
pub struct InitiatorSet {
    registry: MachineRegistry<InitiatorMachine>,
    ctx: InitiatorContext,
    timers: TimerService,
    queue: mpsc::UnboundedSender<WtpEvent>,
    tid_generator: TidGenerator,
}

impl InitiatorSet {
    pub fn new(config: Arc<WtpConfig>, output: WtpOutput, timers: TimerService, queue: mpsc::UnboundedSender<WtpEvent>) -> InitiatorSet {
        InitiatorSet {
            registry: MachineRegistry::new(),
            ctx: InitiatorContext { config, output },
            timers,
            queue,
            tid_generator: TidGenerator::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn get(&self, handle: MachineId) -> Option<&InitiatorMachine> {
        self.registry.get(handle)
    }

    pub fn handle_event(&mut self, event: WtpEvent) {
        let handle = match &event {
            WtpEvent::TrInvokeReq(req) => match self.create_machine(req) {
                Some(handle) => handle,
                None => return,
            },
            _ => match self.find(&event) {
                Some(handle) => handle,
                None => return,
            },
        };

        let Some(machine) = self.registry.get_mut(handle) else {
            return;
        };

        if machine.handle_event(event, &self.ctx) == Lifecycle::Finished {
            if let Some(machine) = self.registry.remove(handle) {
                debug!("destroying initiator machine {}", handle);
                machine.destroy();
            }
        }
    }

    fn create_machine(&mut self, req: &TrInvokeReqData) -> Option<MachineId> {
        if self.registry.get(req.handle).is_some() {
            warn!("TR_Invoke_Req for handle {}, which is already in use - dropping", req.handle);
            return None;
        }

        let generated = self.tid_generator.next_tid();
        let timer = self.timers.create(self.queue.clone());
        debug!("creating initiator machine {} for {:?} tid {}", req.handle, req.addr, generated.tid);

        match self.registry.insert(InitiatorMachine::new(req, generated.tid, generated.tid_new, timer)) {
            Ok(handle) => Some(handle),
            Err(machine) => {
                error!("initiator machine {} collides with an existing machine - dropping", req.handle);
                machine.destroy();
                None
            }
        }
    }

    fn find(&mut self, event: &WtpEvent) -> Option<MachineId> {
        if let Some((addr, tid)) = event.network_key() {
            if let Some(handle) = self.registry.handle_for(&addr, tid) {
                return Some(handle);
            }

            match event {
                WtpEvent::RcvAck(ack) if ack.tid_ok => {
                    info!("tid verification from {:?} for unknown tid {} - aborting", addr, tid);
                    self.ctx.output.send_pdu(addr, pack_abort(tid, AbortType::Provider, AbortReason::InvalidTid));
                }
                WtpEvent::RcvAck(_) | WtpEvent::RcvAbort(_) | WtpEvent::RcvNegativeAck(_) | WtpEvent::RcvErrorPdu(_) => {
                    info!("{} from {:?} with tid {}, but there is no initiator machine - dropping", event.name(), addr, tid);
                }
                _ => {
                    error!("{} is not an initiator event - dropping", event.name());
                }
            }
            return None;
        }

        match event {
            WtpEvent::TrAbortReq(req) if self.registry.get(req.handle).is_none() => {
                warn!("TR_Abort_Req for unknown initiator machine {} - dropping", req.handle);
                None
            }
            WtpEvent::TrAbortReq(req) => Some(req.handle),
            WtpEvent::Timeout(elapsed) if self.registry.get(elapsed.event.handle).is_none() => {
                debug!("{} for initiator machine {} which no longer exists", event.name(), elapsed.event.handle);
                None
            }
            WtpEvent::Timeout(elapsed) => Some(elapsed.event.handle),
            _ => {
                error!("{} is not an initiator event - dropping", event.name());
                None
            }
        }
    }
}

/// The initiator worker loop
pub async fn run_initiator(mut set: InitiatorSet, mut events: mpsc::UnboundedReceiver<WtpEvent>) {
    info!("starting WTP initiator");

    while let Some(event) = events.recv().await {
        let span = span!(Level::TRACE, "initiator_event", event = event.name());
        let _entered = span.enter();

        set.handle_event(event);
    }

    debug!("initiator queue closed with {} live machines", set.len());
}
