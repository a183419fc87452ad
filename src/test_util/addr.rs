use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use crate::addr_tuple::AddrTuple;

/// The well known port of connection oriented WTP
pub const TEST_LOCAL_PORT: u16 = 9201;

/// convenience method for unit test code: create an [AddrTuple] based on a number, the same
///  number generating the same tuple and different numbers different tuples. The local side is
///  the same for all of them.
pub fn test_addr_tuple(number: u16) -> AddrTuple {
    AddrTuple::new(
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, TEST_LOCAL_PORT)),
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, (number >> 8) as u8, number as u8), 49152)),
    )
}
