pub use crate::callsign::{Callsign, NodeAddr};

pub use crate::config::{Capabilities, Modulation, PaDriveMode, RadioConfig, StationConfig};

pub use crate::frame::{Coding, Frame, FrameFlags, FrameStats, SeqCounter};

pub use crate::queue::FrameQueue;

pub use crate::mesh::{MeshConfig, MeshEntry, MeshTable};

pub use crate::subg::{LinkEngine, LinkShared, SubGRadio, SubGState, TestMode};

pub use crate::dispatch::Dispatcher;

pub use crate::hostlink::{Block, BlockStatus, Direction, HostFrame, HostLink};

pub use crate::beacon::{BeaconTask, GpsFix};

pub use crate::node::Node;

pub use crate::timer::{TimeOfDay, Timer, WallClock};

#[cfg(feature = "std")]
pub use crate::udp::UdpRelay;
