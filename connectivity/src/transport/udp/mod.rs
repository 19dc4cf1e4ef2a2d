mod adapter;
mod sockets;

pub use adapter::UdpAdapter;
pub use sockets::{MULTICAST_V4, MULTICAST_V6};
