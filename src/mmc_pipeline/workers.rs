use super::msg_id_counter::MsgIdCounter;
use super::queues::MmcQueues;
use super::types::{generation_failure, MmcPublishSet, PipelineEvent, PipelineSink, StampedRequest};
use crate::error_handling::types::ReactorError;
use crate::reactor::context::WorldContext;
use crate::reactor::event_loop::{EventLoop, WorldHandle};
use crate::reactor::registry::WorldDirectory;
use crate::reactor::sensor::WorldState;
use log::{debug, error, warn};
use std::sync::Arc;

/// Requests stamped per ingress round.
pub const INGRESS_BATCH: usize = 64;

/// Asks a pipeline world to drain its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kick;

fn emit<S: WorldState>(sink: &dyn PipelineSink, ctx: &mut WorldContext<'_, S>, event: PipelineEvent) -> bool {
    if sink.deliver(event) {
        return true;
    }
    warn!("[mmc] {} lost its receiver, stopping", ctx.world_name());
    ctx.stop();
    false
}

/// Drains originator queues, stamps each request with a GId and hands it on
/// for expansion.
pub struct IngressWorld {
    queues: Arc<MmcQueues>,
    counter: MsgIdCounter,
    sink: Arc<dyn PipelineSink>,
}

impl IngressWorld {
    pub fn new(queues: Arc<MmcQueues>, counter: MsgIdCounter, sink: Arc<dyn PipelineSink>) -> Self {
        Self { queues, counter, sink }
    }

    fn drain(&mut self, ctx: &mut WorldContext<'_, Self>) {
        loop {
            let batch = self.queues.take_requests(INGRESS_BATCH);
            if batch.is_empty() {
                return;
            }
            for request in batch {
                let event = match self.counter.next_gid() {
                    Ok(gid) => {
                        let stamped = StampedRequest { gid, request };
                        self.queues.await_generation(&stamped);
                        debug!("[mmc] Request {} of {} stamped as gid {}", stamped.request.ext_id(), stamped.request.identity, gid);
                        PipelineEvent::Generate(stamped)
                    }
                    Err(e) => {
                        error!("[mmc] Cannot assign a gid: {}", e);
                        PipelineEvent::Failed {
                            gid: 0,
                            origin: request.origin,
                            ext_id: request.ext_id(),
                            reason: e.to_string(),
                        }
                    }
                };
                if !emit(self.sink.as_ref(), ctx, event) {
                    return;
                }
            }
        }
    }
}

impl WorldState for IngressWorld {
    type Message = Kick;
    type Timer = ();

    fn on_message(&mut self, ctx: &mut WorldContext<'_, Self>, _msg: Kick) {
        self.drain(ctx);
    }
}

/// Turns finished expansions into publish sets on the priority queues.
pub struct GeneratorWorld {
    queues: Arc<MmcQueues>,
    sink: Arc<dyn PipelineSink>,
    publisher: Option<WorldHandle<PublisherWorld>>,
}

impl GeneratorWorld {
    pub fn new(queues: Arc<MmcQueues>, sink: Arc<dyn PipelineSink>, publisher: Option<WorldHandle<PublisherWorld>>) -> Self {
        Self { queues, sink, publisher }
    }

    fn drain(&mut self, ctx: &mut WorldContext<'_, Self>) {
        let mut published = 0;
        for (request, result) in self.queues.take_generated() {
            if let Some(reason) = generation_failure(&request, &result) {
                let event = PipelineEvent::Failed {
                    gid: result.gid,
                    origin: request.origin,
                    ext_id: request.ext_id(),
                    reason,
                };
                if !emit(self.sink.as_ref(), ctx, event) {
                    return;
                }
                continue;
            }
            self.queues.push_publish(MmcPublishSet::new(&request, result.gid, result.commands));
            published += 1;
        }
        if published > 0 {
            if let Some(publisher) = &self.publisher {
                if let Err(e) = publisher.send_message(Kick) {
                    warn!("[mmc] Cannot wake the publisher: {}", e);
                }
            }
        }
    }
}

impl WorldState for GeneratorWorld {
    type Message = Kick;
    type Timer = ();

    fn on_message(&mut self, ctx: &mut WorldContext<'_, Self>, _msg: Kick) {
        self.drain(ctx);
    }
}

/// Priority merge: pops sets lowest priority first and hands them to the main
/// world for routing.
pub struct PublisherWorld {
    queues: Arc<MmcQueues>,
    sink: Arc<dyn PipelineSink>,
}

impl PublisherWorld {
    pub fn new(queues: Arc<MmcQueues>, sink: Arc<dyn PipelineSink>) -> Self {
        Self { queues, sink }
    }
}

impl WorldState for PublisherWorld {
    type Message = Kick;
    type Timer = ();

    fn on_message(&mut self, ctx: &mut WorldContext<'_, Self>, _msg: Kick) {
        while let Some(set) = self.queues.pop_publish() {
            if !emit(self.sink.as_ref(), ctx, PipelineEvent::Dispatch(set)) {
                return;
            }
        }
    }
}

/// Handles of the three pipeline worlds.
pub struct MmcWorlds {
    ingress: WorldHandle<IngressWorld>,
    generator: WorldHandle<GeneratorWorld>,
    publisher: WorldHandle<PublisherWorld>,
}

impl MmcWorlds {
    pub fn spawn(
        queues: Arc<MmcQueues>,
        counter: MsgIdCounter,
        sink: Arc<dyn PipelineSink>,
        directory: &WorldDirectory,
    ) -> Result<Self, ReactorError> {
        let publisher = EventLoop::new("mmc-publisher", PublisherWorld::new(queues.clone(), sink.clone()))
            .spawn(directory)?;
        let generator = EventLoop::new(
            "mmc-generator",
            GeneratorWorld::new(queues.clone(), sink.clone(), Some(publisher.clone())),
        )
        .spawn(directory)?;
        let ingress = EventLoop::new("mmc-ingress", IngressWorld::new(queues, counter, sink)).spawn(directory)?;
        Ok(Self {
            ingress,
            generator,
            publisher,
        })
    }

    /// New requests were queued.
    pub fn wake_ingress(&self) {
        if let Err(e) = self.ingress.send_message(Kick) {
            warn!("[mmc] Cannot wake ingress: {}", e);
        }
    }

    /// New expansions were pushed.
    pub fn wake_generator(&self) {
        if let Err(e) = self.generator.send_message(Kick) {
            warn!("[mmc] Cannot wake the generator: {}", e);
        }
    }

    pub fn stop(&self) {
        let _ = self.ingress.stop();
        let _ = self.generator.stop();
        let _ = self.publisher.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmc_pipeline::types::{GenResult, MmcRequest};
    use crate::protocol::messages::MmcReq;
    use crate::reactor::sensor::SensorId;
    use crate::test_support::MemoryDatabase;
    use chrono::Utc;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    fn request(origin: u64, id: u32, priority: u8) -> MmcRequest {
        MmcRequest {
            origin: SensorId(origin),
            identity: format!("ops{}", origin),
            req: MmcReq {
                id,
                ne: "NE1".to_string(),
                mmc: format!("CMD-{}", id),
                priority: None,
                log_mode: None,
                user_id: String::new(),
                reference_id: String::new(),
            },
            priority,
            log_mode: 0,
            display: "10.0.0.9".to_string(),
            received_at: Utc::now(),
        }
    }

    fn sink() -> (Arc<dyn PipelineSink>, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Mutex::new(tx)), rx)
    }

    #[test]
    fn test_requests_flow_through_the_worlds() {
        let queues = Arc::new(MmcQueues::new());
        let db = Arc::new(MemoryDatabase::new());
        let counter = MsgIdCounter::restore(db).unwrap();
        let (sink, rx) = sink();
        let directory = WorldDirectory::new();
        let worlds = MmcWorlds::spawn(queues.clone(), counter, sink, &directory).unwrap();

        queues.open(SensorId(1), "ops1", 8);
        queues.insert(request(1, 42, 5)).unwrap();
        worlds.wake_ingress();

        let stamped = match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            PipelineEvent::Generate(stamped) => stamped,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(stamped.gid, 1);
        assert_eq!(stamped.request.ext_id(), 42);

        queues.push_generated(GenResult {
            gid: stamped.gid,
            commands: vec!["A".to_string(), "B".to_string()],
            error: None,
        });
        worlds.wake_generator();

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            PipelineEvent::Dispatch(set) => {
                assert_eq!(set.gid, 1);
                assert_eq!(set.commands.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }

        worlds.stop();
        directory.join_all();
    }

    #[test]
    fn test_generator_error_fails_the_request() {
        let queues = Arc::new(MmcQueues::new());
        let (sink, rx) = sink();
        let directory = WorldDirectory::new();
        let generator = EventLoop::new("mmc-generator", GeneratorWorld::new(queues.clone(), sink, None))
            .spawn(&directory)
            .unwrap();

        let stamped = StampedRequest {
            gid: 3,
            request: request(1, 7, 5),
        };
        queues.await_generation(&stamped);
        queues.push_generated(GenResult {
            gid: 3,
            commands: vec![],
            error: Some("unknown template".to_string()),
        });
        generator.send_message(Kick).unwrap();

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            PipelineEvent::Failed { gid, ext_id, reason, .. } => {
                assert_eq!(gid, 3);
                assert_eq!(ext_id, 7);
                assert_eq!(reason, "unknown template");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(queues.pending_publish(), 0);

        generator.stop().unwrap();
        directory.join_all();
    }

    #[test]
    fn test_publisher_emits_by_priority() {
        let queues = Arc::new(MmcQueues::new());
        queues.push_publish(MmcPublishSet::new(&request(1, 1, 9), 10, vec!["a".into()]));
        queues.push_publish(MmcPublishSet::new(&request(1, 2, 1), 11, vec!["b".into()]));
        let (sink, rx) = sink();
        let directory = WorldDirectory::new();
        let publisher = EventLoop::new("mmc-publisher", PublisherWorld::new(queues, sink))
            .spawn(&directory)
            .unwrap();
        publisher.send_message(Kick).unwrap();

        let gids: Vec<u64> = (0..2)
            .map(|_| match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                PipelineEvent::Dispatch(set) => set.gid,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(gids, vec![11, 10]);

        publisher.stop().unwrap();
        directory.join_all();
    }
}
