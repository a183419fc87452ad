use std::sync::{PoisonError, RwLock};
use rustc_hash::FxHashMap;
use tracing::trace;
use crate::addr_tuple::AddrTuple;
use crate::tid::{Tid, TID_WINDOW_SIZE};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TidValidation {
    /// the tid is in the window, or the first one seen from this peer
    Ok,
    /// there is no cached tid for the peer, and the peer told us it can deal with that (i.e.
    ///  respond to tid verification)
    NoCachedTid,
    /// replay or outdated tid
    OutOfWindow,
    /// the peer started a new tid sequence: the invoke is acceptable without window validation,
    ///  and the cache entry was reset
    TidNew,
}

/// The last tid seen per initiator address tuple, used by the responder to detect duplicate and
///  replayed invokes.
pub struct TidCache {
    last_tids: RwLock<FxHashMap<AddrTuple, Tid>>,
}

impl TidCache {
    pub fn new() -> TidCache {
        TidCache {
            last_tids: Default::default(),
        }
    }

    pub fn validate(&self, addr: &AddrTuple, rcv_tid: Tid, tid_new: bool, no_cache_supported: bool) -> TidValidation {
        let mut last_tids = self.last_tids.write()
            .unwrap_or_else(PoisonError::into_inner);

        if tid_new {
            trace!("tid_new flag from {:?} - resetting cached tid", addr);
            last_tids.insert(*addr, Tid::ZERO);
            return TidValidation::TidNew;
        }

        match last_tids.get_mut(addr) {
            None => {
                if no_cache_supported {
                    TidValidation::NoCachedTid
                }
                else {
                    last_tids.insert(*addr, rcv_tid);
                    TidValidation::Ok
                }
            }
            Some(last_tid) => {
                if tid_in_window(rcv_tid, *last_tid) {
                    *last_tid = rcv_tid;
                    TidValidation::Ok
                }
                else {
                    trace!("tid {} from {:?} is outside the window (last tid was {})", rcv_tid, addr, last_tid);
                    TidValidation::OutOfWindow
                }
            }
        }
    }

    /// Stores a tid that the initiator confirmed through tid verification
    pub fn record_verified(&self, addr: &AddrTuple, rcv_tid: Tid) {
        self.last_tids.write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(*addr, rcv_tid);
    }

    pub fn cached_tid(&self, addr: &AddrTuple) -> Option<Tid> {
        self.last_tids.read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(addr)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.last_tids.read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TidCache {
    fn default() -> Self {
        TidCache::new()
    }
}

/// A tid is valid if it is ahead of the last tid by at most half the initiator's tid space,
///  taking wrap-around into account. Equal tids are replays.
fn tid_in_window(rcv_tid: Tid, last_tid: Tid) -> bool {
    let rcv = rcv_tid.to_raw();
    let last = last_tid.to_raw();

    if rcv > last {
        rcv - last <= TID_WINDOW_SIZE
    }
    else if rcv < last {
        last - rcv >= TID_WINDOW_SIZE
    }
    else {
        false
    }
}
