pub mod sim;
pub mod traits;
pub mod udp;

pub use sim::{SimConnector, SimEvent, SimHandshake, SimLog, SimProfile};
pub use traits::{TransportConnector, TransportLink};
pub use udp::{UdpConnector, UdpLink};
