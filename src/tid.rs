use std::fmt::{Display, Formatter};

/// Tids below this limit belong to transactions where the peer is the initiator, i.e. where we
///  are the responder
pub const INITIATOR_TID_LIMIT: u16 = 1 << 15;

/// Half of the 15 bit tid space an initiator generates from
pub const TID_WINDOW_SIZE: u16 = 1 << 14;

/// A transaction identifier.
///
/// Machines keep tids in 'RcvTID' form, i.e. the way the peer's PDUs carry them. PDUs we send
///  carry the 'SendTID' which has the high bit flipped, so that a receiver can tell from the
///  tid alone whether it is initiator or responder for the transaction.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Debug)]
pub struct Tid(u16);

impl Tid {
    pub const ZERO: Tid = Tid(0);

    pub const fn from_raw(raw: u16) -> Tid {
        Tid(raw)
    }

    pub fn to_raw(&self) -> u16 {
        self.0
    }

    pub fn send_tid(&self) -> Tid {
        Tid(self.0 ^ 0x8000)
    }

    pub fn is_for_responder(&self) -> bool {
        self.0 < INITIATOR_TID_LIMIT
    }
}

impl Display for Tid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct GeneratedTid {
    /// in RcvTID form
    pub tid: Tid,
    pub tid_new: bool,
}

/// Generates tids for locally initiated transactions. The counter lives in the lower half of
///  the tid space; when it wraps, the next transaction is flagged `tid_new` so that the peer's
///  tid cache does not treat the restarted sequence as replays.
pub struct TidGenerator {
    last: Option<u16>,
    tid_new: bool,
}

impl TidGenerator {
    pub fn new() -> TidGenerator {
        TidGenerator {
            last: None,
            // we may be a restarted process, so the peer's cache may hold tids from a previous life
            tid_new: true,
        }
    }

    pub fn next_tid(&mut self) -> GeneratedTid {
        let next = match self.last {
            None => 0,
            Some(last) if last + 1 >= INITIATOR_TID_LIMIT => {
                self.tid_new = true;
                0
            }
            Some(last) => last + 1,
        };
        self.last = Some(next);

        GeneratedTid {
            tid: Tid(next).send_tid(),
            tid_new: std::mem::take(&mut self.tid_new),
        }
    }
}

impl Default for TidGenerator {
    fn default() -> Self {
        TidGenerator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, 0x8000)]
    #[case::low(5, 0x8005)]
    #[case::high(0x8005, 5)]
    #[case::max(0xffff, 0x7fff)]
    fn test_send_tid(#[case] tid: u16, #[case] expected: u16) {
        assert_eq!(Tid::from_raw(tid).send_tid(), Tid::from_raw(expected));
        assert_eq!(Tid::from_raw(tid).send_tid().send_tid(), Tid::from_raw(tid));
    }

    #[rstest]
    #[case(0, true)]
    #[case(0x7fff, true)]
    #[case(0x8000, false)]
    #[case(0xffff, false)]
    fn test_is_for_responder(#[case] tid: u16, #[case] expected: bool) {
        assert_eq!(Tid::from_raw(tid).is_for_responder(), expected);
    }

    #[test]
    fn test_generator_sequence() {
        let mut generator = TidGenerator::new();

        assert_eq!(generator.next_tid(), GeneratedTid { tid: Tid::from_raw(0x8000), tid_new: true });
        assert_eq!(generator.next_tid(), GeneratedTid { tid: Tid::from_raw(0x8001), tid_new: false });
        assert_eq!(generator.next_tid(), GeneratedTid { tid: Tid::from_raw(0x8002), tid_new: false });
    }

    #[test]
    fn test_generator_wrap() {
        let mut generator = TidGenerator::new();
        generator.last = Some(INITIATOR_TID_LIMIT - 2);
        generator.tid_new = false;

        assert_eq!(generator.next_tid(), GeneratedTid { tid: Tid::from_raw(0xffff), tid_new: false });
        assert_eq!(generator.next_tid(), GeneratedTid { tid: Tid::from_raw(0x8000), tid_new: true });
        assert_eq!(generator.next_tid(), GeneratedTid { tid: Tid::from_raw(0x8001), tid_new: false });
    }

    #[test]
    fn test_generated_tids_are_not_for_responder() {
        let mut generator = TidGenerator::new();
        for _ in 0..10 {
            let generated = generator.next_tid();
            assert!(!generated.tid.is_for_responder());
            assert!(generated.tid.send_tid().is_for_responder());
        }
    }
}
