use tokio::sync::mpsc;
use tracing::{debug, trace};
use crate::addr_tuple::AddrTuple;
use crate::events::WtpIndication;
use crate::pdu::WtpPdu;

/// A PDU on its way to the datagram layer
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OutboundPdu {
    pub addr: AddrTuple,
    pub pdu: WtpPdu,
}

/// The side effects of machines: PDUs going down to the datagram layer, and indications going up
///  to the application. Both are queue handoffs, so machines never block on I/O.
#[derive(Clone)]
pub struct WtpOutput {
    datagrams: mpsc::UnboundedSender<OutboundPdu>,
    indications: mpsc::UnboundedSender<WtpIndication>,
}

impl WtpOutput {
    pub fn new(datagrams: mpsc::UnboundedSender<OutboundPdu>, indications: mpsc::UnboundedSender<WtpIndication>) -> WtpOutput {
        WtpOutput { datagrams, indications }
    }

    pub fn send_pdu(&self, addr: AddrTuple, pdu: WtpPdu) {
        trace!("sending {:?} PDU to {:?}", pdu.pdu_type(), addr);
        if self.datagrams.send(OutboundPdu { addr, pdu }).is_err() {
            debug!("datagram layer is shut down - dropping outbound PDU");
        }
    }

    pub fn indicate(&self, indication: WtpIndication) {
        trace!("indication {:?}", indication);
        if self.indications.send(indication).is_err() {
            debug!("application layer is shut down - dropping indication");
        }
    }
}
