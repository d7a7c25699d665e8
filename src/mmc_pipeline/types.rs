use crate::protocol::messages::{MmcPublishReq, MmcReq};
use crate::reactor::sensor::SensorId;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Priority used when neither the request nor the authority names one.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Error text sent when no manager holds the command port of the NE.
pub fn not_routable_message(ne: &str) -> String {
    format!("The Command (8286)port on NMS is not connected. (NE : {})", ne)
}

/// One accepted request, as queued for its originator.
#[derive(Debug, Clone, PartialEq)]
pub struct MmcRequest {
    pub origin: SensorId,
    pub identity: String,
    pub req: MmcReq,
    pub priority: u8,
    pub log_mode: u8,
    /// Originator IP.
    pub display: String,
    pub received_at: DateTime<Utc>,
}

impl MmcRequest {
    pub fn ext_id(&self) -> u32 {
        self.req.id
    }
}

/// A request that was assigned a global id and waits for expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedRequest {
    pub gid: u64,
    pub request: MmcRequest,
}

/// Expansion of one request by an MMC generator (or the unexpanded fallback).
#[derive(Debug, Clone, PartialEq)]
pub struct GenResult {
    pub gid: u64,
    pub commands: Vec<String>,
    /// Set when the generator refused the request.
    pub error: Option<String>,
}

impl GenResult {
    /// Publishes the request as written when no generator is connected.
    pub fn passthrough(stamped: &StampedRequest) -> Self {
        Self {
            gid: stamped.gid,
            commands: vec![stamped.request.req.mmc.clone()],
            error: None,
        }
    }
}

/// Why an expansion cannot be published: the generator refused it or it came
/// back empty.
pub fn generation_failure(request: &MmcRequest, result: &GenResult) -> Option<String> {
    match &result.error {
        Some(reason) => Some(reason.clone()),
        None if result.commands.is_empty() => Some(format!("No command generated for {}", request.req.mmc)),
        None => None,
    }
}

/// Commands of one request, dispatched one at a time to the owning manager.
#[derive(Debug, Clone, PartialEq)]
pub struct MmcPublishSet {
    pub gid: u64,
    pub origin: SensorId,
    pub ext_id: u32,
    pub ne: String,
    pub priority: u8,
    pub log_mode: u8,
    pub display: String,
    pub user_id: String,
    pub reference_id: String,
    pub commands: VecDeque<String>,
}

impl MmcPublishSet {
    pub fn new(request: &MmcRequest, gid: u64, commands: Vec<String>) -> Self {
        Self {
            gid,
            origin: request.origin,
            ext_id: request.ext_id(),
            ne: request.req.ne.clone(),
            priority: request.priority,
            log_mode: request.log_mode,
            display: request.display.clone(),
            user_id: request.req.user_id.clone(),
            reference_id: request.req.reference_id.clone(),
            commands: commands.into(),
        }
    }

    /// Builds the publish of the next command, removing it from the set.
    pub fn next_publish(&mut self) -> Option<MmcPublishReq> {
        let mmc = self.commands.pop_front()?;
        Some(MmcPublishReq {
            gid: self.gid,
            ne: self.ne.clone(),
            mmc,
            priority: self.priority,
            log_mode: self.log_mode,
            display: self.display.clone(),
            user_id: self.user_id.clone(),
            reference_id: self.reference_id.clone(),
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.commands.is_empty()
    }
}

/// What the pipeline worlds hand back to the main world, which owns the sockets.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Send `MMC_GEN_REQ` to a generator, or fall back to the unexpanded command.
    Generate(StampedRequest),
    /// Route the set to the manager holding the NE's command port.
    Dispatch(MmcPublishSet),
    /// The request ended before dispatch; send `R_ERROR` to the originator.
    Failed {
        gid: u64,
        origin: SensorId,
        ext_id: u32,
        reason: String,
    },
}

/// Receives pipeline events; returns false once the receiver is gone.
pub trait PipelineSink: Send + Sync {
    fn deliver(&self, event: PipelineEvent) -> bool;
}

impl PipelineSink for std::sync::Mutex<std::sync::mpsc::Sender<PipelineEvent>> {
    fn deliver(&self, event: PipelineEvent) -> bool {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .send(event)
            .is_ok()
    }
}
