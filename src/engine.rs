use std::sync::Arc;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use crate::addr_tuple::AddrTuple;
use crate::config::WtpConfig;
use crate::datagram::{run_datagram_receiver, run_datagram_sender};
use crate::events::*;
use crate::initiator::{run_initiator, InitiatorSet};
use crate::output::{OutboundPdu, WtpOutput};
use crate::pdu::{AbortType, PduCodec, TransactionClass};
use crate::responder::{run_responder, ResponderSet};
use crate::tid_cache::TidCache;
use crate::timers::{run_timers, TimerService};
use crate::unpack::Dispatcher;

/// A running WTP engine: the timer worker plus the responder and initiator machine sets, each
///  in a task of its own, fed by the entry points below.
///
/// Outbound PDUs and indications leave the engine through the queues passed to
///  [WtpEngine::start], so the engine can run on top of any datagram layer.
/// [WtpEngine::start_udp] wires it to a UDP socket instead.
pub struct WtpEngine {
    dispatcher: Arc<Dispatcher>,
    responder: mpsc::UnboundedSender<WtpEvent>,
    initiator: mpsc::UnboundedSender<WtpEvent>,
    tid_cache: Arc<TidCache>,
    workers: Vec<JoinHandle<()>>,
}

impl WtpEngine {
    /// Must be called from within a Tokio runtime
    pub fn start(config: WtpConfig, codec: Arc<dyn PduCodec>, datagrams: mpsc::UnboundedSender<OutboundPdu>, indications: mpsc::UnboundedSender<WtpIndication>) -> anyhow::Result<WtpEngine> {
        config.validate()?;
        let config = Arc::new(config);

        let output = WtpOutput::new(datagrams, indications);
        let tid_cache = Arc::new(TidCache::new());
        let (timers, timer_commands) = TimerService::new();

        let (responder_send, responder_recv) = mpsc::unbounded_channel();
        let (initiator_send, initiator_recv) = mpsc::unbounded_channel();

        let responder_set = ResponderSet::new(config.clone(), output.clone(), tid_cache.clone(), timers.clone(), responder_send.clone());
        let initiator_set = InitiatorSet::new(config, output, timers, initiator_send.clone());

        let workers = vec![
            tokio::spawn(run_timers(timer_commands)),
            tokio::spawn(run_responder(responder_set, responder_recv)),
            tokio::spawn(run_initiator(initiator_set, initiator_recv)),
        ];

        info!("WTP engine started");
        Ok(WtpEngine {
            dispatcher: Arc::new(Dispatcher::new(codec, responder_send.clone(), initiator_send.clone())),
            responder: responder_send,
            initiator: initiator_send,
            tid_cache,
            workers,
        })
    }

    /// Starts an engine that receives from and sends through the given UDP socket
    pub fn start_udp(config: WtpConfig, codec: Arc<dyn PduCodec>, socket: Arc<UdpSocket>, indications: mpsc::UnboundedSender<WtpIndication>) -> anyhow::Result<WtpEngine> {
        let (datagram_send, datagram_recv) = mpsc::unbounded_channel();
        let mut engine = WtpEngine::start(config, codec.clone(), datagram_send, indications)?;

        engine.workers.push(tokio::spawn(run_datagram_sender(socket.clone(), codec, datagram_recv)));

        let dispatcher = engine.dispatcher.clone();
        engine.workers.push(tokio::spawn(async move {
            if let Err(e) = run_datagram_receiver(socket, dispatcher).await {
                error!("datagram receive loop terminated: {}", e);
            }
        }));

        Ok(engine)
    }

    pub fn dispatch_datagram(&self, addr: AddrTuple, datagram: &[u8]) {
        self.dispatcher.dispatch_datagram(addr, datagram);
    }

    /// Starts a transaction. The handle is chosen by the caller and must not be in use by a
    ///  running initiator transaction.
    pub fn tr_invoke_req(&self, handle: MachineId, addr: AddrTuple, tcl: TransactionClass, u_ack: bool, user_data: Bytes) {
        self.to_initiator(WtpEvent::TrInvokeReq(TrInvokeReqData { handle, addr, tcl, u_ack, user_data }));
    }

    pub fn tr_invoke_res(&self, handle: MachineId) {
        self.to_responder(WtpEvent::TrInvokeRes(TrInvokeResData { handle }));
    }

    pub fn tr_result_req(&self, handle: MachineId, user_data: Bytes) {
        self.to_responder(WtpEvent::TrResultReq(TrResultReqData { handle, user_data }));
    }

    pub fn responder_abort_req(&self, handle: MachineId, reason: u8) {
        self.to_responder(WtpEvent::TrAbortReq(TrAbortReqData { handle, abort_type: AbortType::User, reason }));
    }

    pub fn initiator_abort_req(&self, handle: MachineId, reason: u8) {
        self.to_initiator(WtpEvent::TrAbortReq(TrAbortReqData { handle, abort_type: AbortType::User, reason }));
    }

    pub fn tid_cache(&self) -> &TidCache {
        &self.tid_cache
    }

    pub fn shutdown(self) {
        info!("shutting down WTP engine");
        for worker in &self.workers {
            worker.abort();
        }
    }

    fn to_responder(&self, event: WtpEvent) {
        if self.responder.send(event).is_err() {
            debug!("responder is shut down - dropping primitive");
        }
    }

    fn to_initiator(&self, event: WtpEvent) {
        if self.initiator.send(event).is_err() {
            debug!("initiator is shut down - dropping primitive");
        }
    }
}
