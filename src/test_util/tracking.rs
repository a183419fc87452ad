use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use crate::events::{TimerEvent, WtpIndication};
use crate::output::{OutboundPdu, WtpOutput};
use crate::timers::{TimerCommand, TimerId, TimerService};

/// Captures everything machines send down to the datagram layer or up to the application
pub struct TrackingOutput {
    output: WtpOutput,
    datagrams: mpsc::UnboundedReceiver<OutboundPdu>,
    indications: mpsc::UnboundedReceiver<WtpIndication>,
}

impl TrackingOutput {
    pub fn new() -> TrackingOutput {
        let (datagram_send, datagrams) = mpsc::unbounded_channel();
        let (indication_send, indications) = mpsc::unbounded_channel();

        TrackingOutput {
            output: WtpOutput::new(datagram_send, indication_send),
            datagrams,
            indications,
        }
    }

    pub fn output(&self) -> WtpOutput {
        self.output.clone()
    }

    pub fn next_pdu(&mut self) -> OutboundPdu {
        match self.datagrams.try_recv() {
            Ok(pdu) => pdu,
            Err(_) => panic!("no PDU was sent"),
        }
    }

    pub fn sent_pdus(&mut self) -> Vec<OutboundPdu> {
        let mut result = Vec::new();
        while let Ok(pdu) = self.datagrams.try_recv() {
            result.push(pdu);
        }
        result
    }

    pub fn assert_no_pdu(&mut self) {
        if let Ok(pdu) = self.datagrams.try_recv() {
            panic!("unexpected PDU {:?}", pdu);
        }
    }

    pub fn next_indication(&mut self) -> WtpIndication {
        match self.indications.try_recv() {
            Ok(indication) => indication,
            Err(_) => panic!("no indication was sent"),
        }
    }

    pub fn assert_no_indication(&mut self) {
        if let Ok(indication) = self.indications.try_recv() {
            panic!("unexpected indication {:?}", indication);
        }
    }
}

impl Default for TrackingOutput {
    fn default() -> Self {
        TrackingOutput::new()
    }
}

struct ArmedTimer {
    deadline: Instant,
    event: TimerEvent,
    fire: Box<dyn FnOnce() + Send>,
}

/// A stand-in for the timer worker: it keeps track of armed timers, and fires them only when a
///  test says so. Firing a timer delivers its elapse event to the owner's queue exactly like the
///  real worker does.
pub struct ManualTimers {
    service: TimerService,
    commands: mpsc::UnboundedReceiver<TimerCommand>,
    armed: FxHashMap<TimerId, ArmedTimer>,
}

impl ManualTimers {
    pub fn new() -> ManualTimers {
        let (service, commands) = TimerService::new();
        ManualTimers {
            service,
            commands,
            armed: FxHashMap::default(),
        }
    }

    pub fn service(&self) -> TimerService {
        self.service.clone()
    }

    fn sync(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                TimerCommand::Start { timer_id, deadline, event, fire } => {
                    self.armed.insert(timer_id, ArmedTimer { deadline, event, fire });
                }
                TimerCommand::Stop { timer_id } => {
                    self.armed.remove(&timer_id);
                }
            }
        }
    }

    /// The events of all armed timers, earliest deadline first
    pub fn armed(&mut self) -> Vec<TimerEvent> {
        self.sync();
        let mut armed = self.armed.values()
            .map(|t| (t.deadline, t.event))
            .collect::<Vec<_>>();
        armed.sort_by_key(|(deadline, _)| *deadline);
        armed.into_iter()
            .map(|(_, event)| event)
            .collect()
    }

    pub fn is_armed(&mut self, event: TimerEvent) -> bool {
        self.armed().contains(&event)
    }

    /// Fires the armed timer with the given event, returning `false` if there is none
    pub fn fire(&mut self, event: TimerEvent) -> bool {
        self.sync();
        let timer_id = self.armed.iter()
            .find(|(_, t)| t.event == event)
            .map(|(id, _)| *id);

        match timer_id.and_then(|id| self.armed.remove(&id)) {
            Some(timer) => {
                (timer.fire)();
                true
            }
            None => false,
        }
    }
}

impl Default for ManualTimers {
    fn default() -> Self {
        ManualTimers::new()
    }
}
