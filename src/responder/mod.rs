//! The responder side of WTP: machines for transactions initiated by peers.

pub mod responder_state;
pub mod responder_machine;

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, span, Level};
use crate::addr_tuple::AddrTuple;
use crate::config::WtpConfig;
use crate::events::{MachineId, WtpEvent};
use crate::output::WtpOutput;
use crate::pack::pack_abort;
use crate::pdu::{AbortReason, AbortType, TransactionClass};
use crate::registry::{Lifecycle, MachineRegistry};
use crate::responder::responder_machine::{ResponderContext, ResponderMachine};
use crate::tid::Tid;
use crate::tid_cache::TidCache;
use crate::timers::TimerService;

/// All responder machines, owned by the responder worker. Events are processed one at a time,
///  and each is handled completely before the next one is looked at.
pub struct ResponderSet {
    registry: MachineRegistry<ResponderMachine>,
    ctx: ResponderContext,
    timers: TimerService,
    /// the worker's own queue, which is where timers deliver their elapse events
    queue: mpsc::UnboundedSender<WtpEvent>,
    handle_counter: u64,
}

impl ResponderSet {
    pub fn new(config: Arc<WtpConfig>, output: WtpOutput, tid_cache: Arc<TidCache>, timers: TimerService, queue: mpsc::UnboundedSender<WtpEvent>) -> ResponderSet {
        ResponderSet {
            registry: MachineRegistry::new(),
            ctx: ResponderContext {
                config,
                output,
                tid_cache,
            },
            timers,
            queue,
            handle_counter: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn get(&self, handle: MachineId) -> Option<&ResponderMachine> {
        self.registry.get(handle)
    }

    pub fn handle_event(&mut self, event: WtpEvent) {
        if let WtpEvent::RcvInvoke(invoke) = &event {
            if invoke.version != 0 {
                info!("invoke with WTP version {} from {:?} - aborting", invoke.version, invoke.addr);
                self.ctx.output.send_pdu(invoke.addr, pack_abort(invoke.tid, AbortType::Provider, AbortReason::WtpVersionZero));
                return;
            }
        }

        let Some(handle) = self.find_or_create(&event) else {
            return;
        };
        let Some(machine) = self.registry.get_mut(handle) else {
            return;
        };

        if machine.handle_event(event, &self.ctx) == Lifecycle::Finished {
            if let Some(machine) = self.registry.remove(handle) {
                debug!("destroying responder machine {}", handle);
                machine.destroy();
            }
        }
    }

    fn find_or_create(&mut self, event: &WtpEvent) -> Option<MachineId> {
        if let Some((addr, tid)) = event.network_key() {
            if let Some(handle) = self.registry.handle_for(&addr, tid) {
                return Some(handle);
            }

            return match event {
                WtpEvent::RcvInvoke(invoke) => {
                    let sar_enabled = !invoke.gtr || !invoke.ttr;
                    self.create_machine(addr, tid, invoke.tcl, invoke.u_ack, sar_enabled)
                }
                WtpEvent::RcvErrorPdu(_) => {
                    // a machine of its own so that the abort goes out through the regular path
                    self.create_machine(addr, tid, TransactionClass::Class0, false, false)
                }
                _ => {
                    info!("{} from {:?} with tid {}, but there is no responder machine - dropping", event.name(), addr, tid);
                    None
                }
            };
        }

        match event {
            WtpEvent::TrInvokeReq(_) => {
                error!("TR_Invoke_Req is an initiator primitive - dropping");
                None
            }
            WtpEvent::Timeout(elapsed) => {
                let handle = elapsed.event.handle;
                if self.registry.get(handle).is_none() {
                    debug!("{} for responder machine {} which no longer exists", event.name(), handle);
                    return None;
                }
                Some(handle)
            }
            _ => {
                let handle = event.handle()?;
                if self.registry.get(handle).is_none() {
                    error!("{} for unknown responder machine {} - dropping", event.name(), handle);
                    return None;
                }
                Some(handle)
            }
        }
    }

    fn create_machine(&mut self, addr: AddrTuple, tid: Tid, tcl: TransactionClass, u_ack: bool, sar_enabled: bool) -> Option<MachineId> {
        self.handle_counter += 1;
        let handle = MachineId::from_raw(self.handle_counter);
        let timer = self.timers.create(self.queue.clone());

        debug!("creating responder machine {} for {:?} tid {}", handle, addr, tid);
        match self.registry.insert(ResponderMachine::new(handle, addr, tid, tcl, u_ack, sar_enabled, timer)) {
            Ok(handle) => Some(handle),
            Err(machine) => {
                error!("responder machine {} collides with an existing machine - dropping", handle);
                machine.destroy();
                None
            }
        }
    }
}

/// The responder worker loop
pub async fn run_responder(mut set: ResponderSet, mut events: mpsc::UnboundedReceiver<WtpEvent>) {
    info!("starting WTP responder");

    while let Some(event) = events.recv().await {
        let span = span!(Level::TRACE, "responder_event", event = event.name());
        let _entered = span.enter();

        set.handle_event(event);
    }

    debug!("responder queue closed with {} live machines", set.len());
}
