//! A WTP (Wireless Transaction Protocol) engine.
//!
//! WTP runs transactions over an unreliable datagram service. An initiator sends an invoke, and
//!  the responder answers it with an ack (class 1) or a result that is acknowledged in turn
//!  (class 2); class 0 invokes are fire-and-forget. Retransmission, duplicate detection, tid
//!  verification and segmentation of large messages happen inside the protocol.
//!
//! The engine consists of three workers that talk through unbounded queues:
//!  * the responder machine set, handling transactions started by peers
//!  * the initiator machine set, handling transactions started by the local application
//!  * the timer service that drives retransmission and timeouts for both
//!
//! Inbound datagrams are unpacked into events and routed to one of the machine sets by tid.
//!  Each machine is a state machine driven by a pure transition table. Its side effects are
//!  outbound PDUs for the datagram layer, indications for the application and timer commands,
//!  and none of them block.
//!
//! The byte level PDU format is not part of this crate: it is plugged in through
//!  [pdu::PduCodec].

pub mod config;
pub mod addr_tuple;
pub mod tid;
pub mod pdu;
pub mod pack;
pub mod events;
pub mod timers;
pub mod tid_cache;
pub mod sar;
pub mod output;
pub mod registry;
pub mod responder;
pub mod initiator;
pub mod unpack;
pub mod datagram;
pub mod engine;
pub mod test_util;
