pub mod depacketizer;
pub mod packet;
pub mod receiver;
pub mod replay;
pub mod samplebuilder;
pub mod seq;
pub mod vp8;

pub use depacketizer::{Depacketizer, PartitionHeadChecker, PassthroughDepacketizer};
pub use packet::Packet;
pub use receiver::{ReceiveSummary, RtpReceiver};
pub use samplebuilder::{Sample, SampleBuilder, SampleBuilderStats};
pub use vp8::{Vp8Depacketizer, Vp8PartitionHeadChecker};

use crate::config::{Codec, Config};
use crate::error::Result;

/// Depacketizer picked at runtime from configuration
pub type DynDepacketizer = Box<dyn Depacketizer + Send>;

/// Build a sample builder for the configured codec, with the codec's
/// partition-head checker attached when it has one
pub fn builder_for(config: &Config) -> Result<SampleBuilder<DynDepacketizer>> {
    let builder = match config.codec {
        Codec::Raw => {
            SampleBuilder::from_config(config, Box::new(PassthroughDepacketizer) as DynDepacketizer)?
        }
        Codec::Vp8 => SampleBuilder::from_config(config, Box::new(Vp8Depacketizer) as DynDepacketizer)?
            .with_partition_head_checker(Vp8PartitionHeadChecker),
    };
    Ok(builder)
}
