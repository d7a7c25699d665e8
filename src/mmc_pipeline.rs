//! MMC command pipeline.
//!
//! Originator requests go through a bounded per-identity queue, get a global id,
//! are expanded by a generator, merged by priority and dispatched to the manager
//! holding the NE's command port. Results flow back through the [`Correlator`].
//!
//! The queue work runs on three worker worlds ([`MmcWorlds`]); everything that
//! touches a socket stays in the main world, which receives [`PipelineEvent`]s.

use std::time::Duration;

pub mod correlator;
pub mod fragment;
pub mod msg_id_counter;
pub mod ne_router;
pub mod queues;
pub mod request_queue;
pub mod types;
pub mod workers;

pub use correlator::{Correlated, Correlator};
pub use fragment::{result_messages, split_result, CHUNK_LEN};
pub use msg_id_counter::MsgIdCounter;
pub use ne_router::{NeRouter, Route};
pub use queues::MmcQueues;
pub use request_queue::{MmcRequestQueue, Rejected, MAX_CONSECUTIVE_FAILURES};
pub use types::{
    generation_failure, not_routable_message, GenResult, MmcPublishSet, MmcRequest, PipelineEvent, PipelineSink,
    StampedRequest, DEFAULT_PRIORITY,
};
pub use workers::{Kick, MmcWorlds, INGRESS_BATCH};

/// Short garbage sweep period.
pub const GARBAGE_SHORT: Duration = Duration::from_secs(60);
/// Long garbage sweep period.
pub const GARBAGE_LONG: Duration = Duration::from_secs(3 * 3600);
