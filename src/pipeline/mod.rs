pub mod completion;
pub mod device;
pub mod ingress;
pub mod layout;
pub mod packet_mgr;
pub mod queue_pool;
pub mod stats;
pub mod submit;
pub mod translate;
pub mod types;

#[cfg(test)]
mod unit_tests;

pub use completion::CompletionMatcher;
pub use device::{DeviceConfig, DeviceModel};
pub use ingress::CommandIngress;
pub use packet_mgr::RequestPacketManager;
pub use queue_pool::{DeviceQueuePool, SharedPool};
pub use stats::{PipelineReport, StatsCollector};
pub use submit::DeviceSubmission;
pub use translate::BlockTranslation;
pub use types::*;
