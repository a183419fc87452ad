use std::fmt::{Debug, Display, Formatter};
use std::net::SocketAddr;

/// The pair of endpoints a transaction runs between. Two tuples are the same iff local and
///  remote IP and port all match.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct AddrTuple {
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

impl AddrTuple {
    pub fn new(local: SocketAddr, remote: SocketAddr) -> AddrTuple {
        AddrTuple { local, remote }
    }
}

impl Debug for AddrTuple {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}<->{}]", self.local, self.remote)
    }
}

impl Display for AddrTuple {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}
