//! Main-world side of the MMC pipeline: originators, generators, dispatch to
//! managers and delivery of results.

use super::dispatch::{unexpected, HandlerResult};
use super::state::{Ctx, Originator, ServerState, ServerTimer};
use crate::entity_store::types::SettingStatus;
use crate::error_handling::types::SessionError;
use crate::mmc_pipeline::{
    not_routable_message, result_messages, Correlated, GenResult, MmcPublishSet, MmcRequest, PipelineEvent,
    StampedRequest, DEFAULT_PRIORITY,
};
use crate::protocol::messages::{
    MmcGenReq, MmcGenRes, MmcIdentReq, MmcIdentRes, MmcPublishRes, MmcReq, MmcReqAck, MmcRes, ResultMode,
};
use crate::protocol::msg_id::{
    AS_MMC_IDENT_REQ, AS_MMC_IDENT_RES, AS_MMC_REQ, AS_MMC_REQ_ACK, AS_MMC_REQ_OLD, AS_MMC_RES,
    CMD_COMMAND_RULE_DOWN_ACK, CMD_MMC_PUBLISH_REQ, MMC_GEN_REQ, MMC_GEN_RES,
};
use crate::protocol::session_type::SessionType;
use crate::reactor::{SensorId, TimerKey};
use crate::session_management::{GroupKind, SessionRole};
use crate::transport::{CloseReason, Packet};
use chrono::Utc;
use log::{debug, info, warn};

/// Queue size of an originator without a command authority row.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

impl ServerState {
    /// `AS_MMC_IDENT_REQ` on the external listener, checked against the command authority table.
    pub fn identify_external(&mut self, ctx: &mut Ctx<'_>, id: SensorId, packet: &Packet) -> Result<(), SessionError> {
        if packet.msg_id != AS_MMC_IDENT_REQ {
            return Err(SessionError::NotIdentified);
        }
        let req: MmcIdentReq = packet.decode_body()?;
        let authority = match self.store.authority(&req.name) {
            Some(a) if a.status.setting_status == SettingStatus::Start => a.clone(),
            Some(_) => return self.refuse_external(ctx, id, format!("{} is disabled", req.name)),
            None => {
                return self.refuse_external(ctx, id, format!("{} is not a registered command authority", req.name))
            }
        };
        let sessions = self.groups.external.count_where(
            |s| matches!(&s.role, SessionRole::ExternalMmc { identity } if *identity == req.name),
        );
        if sessions >= authority.max_session_cnt {
            self.send(
                ctx,
                id,
                AS_MMC_IDENT_RES,
                &MmcIdentRes {
                    result_mode: 0,
                    reason: format!("{} already has {} sessions", req.name, sessions),
                },
            );
            return Err(SessionError::SessionLimitReached(req.name));
        }

        // several sessions share one identity, so each registers under its own label
        let label = format!("{}{}", req.name, id);
        let display = {
            let session = self.groups.external.identify(id, SessionType::ExternalMmc, &label)?;
            session.role = SessionRole::ExternalMmc {
                identity: req.name.clone(),
            };
            session.peer_ip().unwrap_or_default().to_string()
        };
        self.queues.open(id, &req.name, authority.max_cmd_queue);
        self.originators.insert(
            id,
            Originator {
                identity: req.name.clone(),
                ack_mode: authority.ack_mode,
                priority: authority.priority,
                log_mode: authority.log_mode,
                display,
            },
        );
        self.send(
            ctx,
            id,
            AS_MMC_IDENT_RES,
            &MmcIdentRes {
                result_mode: 1,
                reason: String::new(),
            },
        );
        self.on_identified(ctx, GroupKind::External, id);
        Ok(())
    }

    fn refuse_external(&mut self, ctx: &mut Ctx<'_>, id: SensorId, reason: String) -> Result<(), SessionError> {
        self.send(
            ctx,
            id,
            AS_MMC_IDENT_RES,
            &MmcIdentRes {
                result_mode: 0,
                reason: reason.clone(),
            },
        );
        Err(SessionError::Unauthorized(reason))
    }

    /// Opens the request queue of a scheduler or COMMAND GUI session.
    pub fn open_originator(&mut self, _ctx: &mut Ctx<'_>, id: SensorId) {
        let Some(session) = self.groups.session(id) else {
            return;
        };
        let name = session.name.clone().unwrap_or_default();
        let display = session.peer_ip().unwrap_or_default().to_string();
        let (originator, capacity) = match self.store.authority(&name) {
            Some(a) => (
                Originator {
                    identity: name.clone(),
                    ack_mode: a.ack_mode,
                    priority: a.priority,
                    log_mode: a.log_mode,
                    display,
                },
                a.max_cmd_queue,
            ),
            None => (
                Originator {
                    identity: name.clone(),
                    ack_mode: true,
                    priority: DEFAULT_PRIORITY,
                    log_mode: 0,
                    display,
                },
                DEFAULT_QUEUE_CAPACITY,
            ),
        };
        self.queues.open(id, &name, capacity);
        self.originators.insert(id, originator);
    }

    pub fn on_originator_packet(&mut self, ctx: &mut Ctx<'_>, id: SensorId, packet: &Packet) -> HandlerResult {
        match packet.msg_id {
            AS_MMC_REQ | AS_MMC_REQ_OLD => {
                let req: MmcReq = packet.decode_body()?;
                self.on_mmc_request(ctx, id, req);
                Ok(())
            }
            _ => unexpected(packet),
        }
    }

    /// Queues a request of an originator and acks it when its authority asks for acks.
    pub fn on_mmc_request(&mut self, ctx: &mut Ctx<'_>, id: SensorId, req: MmcReq) {
        let Some(originator) = self.originators.get(&id).cloned() else {
            warn!("[mmc] Request {} from {} which has no queue", req.id, id);
            return;
        };
        let ext_id = req.id;
        let request = MmcRequest {
            origin: id,
            identity: originator.identity.clone(),
            priority: req.priority.unwrap_or(originator.priority),
            log_mode: req.log_mode.unwrap_or(originator.log_mode),
            display: originator.display.clone(),
            received_at: Utc::now(),
            req,
        };
        match self.queues.insert(request) {
            Ok(depth) => {
                debug!("[mmc] Request {} of {} queued ({} waiting)", ext_id, originator.identity, depth);
                if originator.ack_mode {
                    self.send(
                        ctx,
                        id,
                        AS_MMC_REQ_ACK,
                        &MmcReqAck {
                            id: ext_id,
                            result_mode: 1,
                            reason: String::new(),
                        },
                    );
                }
                self.kick_ingress();
            }
            Err(rejected) => {
                warn!("[mmc] Request {} of {} refused: {}", ext_id, originator.identity, rejected.error);
                let reason = rejected.error.to_string();
                if originator.ack_mode {
                    self.send(
                        ctx,
                        id,
                        AS_MMC_REQ_ACK,
                        &MmcReqAck {
                            id: ext_id,
                            result_mode: 0,
                            reason,
                        },
                    );
                } else {
                    self.send_results(ctx, id, result_messages(ext_id, &reason, ResultMode::Error));
                }
                if rejected.should_close() {
                    self.close_session(
                        ctx,
                        id,
                        CloseReason::Local(format!("{} consecutive refused requests", rejected.consecutive)),
                    );
                }
            }
        }
    }

    /// Wakes the ingress world to stamp queued requests.
    fn kick_ingress(&self) {
        match &self.pipeline {
            Some(worlds) => worlds.wake_ingress(),
            None => warn!("[mmc] Pipeline is not running"),
        }
    }

    /// Wakes the generator world to turn finished expansions into dispatches.
    fn kick_generator(&self) {
        if let Some(worlds) = &self.pipeline {
            worlds.wake_generator();
        }
    }

    pub fn on_pipeline_event(&mut self, ctx: &mut Ctx<'_>, event: PipelineEvent) {
        match event {
            PipelineEvent::Generate(stamped) => self.on_generate(ctx, stamped),
            PipelineEvent::Dispatch(set) => self.dispatch_set(ctx, set),
            PipelineEvent::Failed {
                gid: 0,
                origin,
                ext_id,
                reason,
            } => self.send_results(ctx, origin, result_messages(ext_id, &reason, ResultMode::Error)),
            PipelineEvent::Failed { gid, reason, .. } => self.fail_request(ctx, gid, &reason),
        }
    }

    /// A stamped request enters the correlator and goes to a generator, or
    /// unexpanded to the publish queue when none is connected.
    fn on_generate(&mut self, ctx: &mut Ctx<'_>, stamped: StampedRequest) {
        let gid = stamped.gid;
        let origin = stamped.request.origin;
        let key = ctx.set_timer_for(
            SensorId::WORLD,
            self.settings.mmc_response_timeout,
            ServerTimer::MmcResponse { gid },
        );
        self.correlator
            .register(gid, origin, stamped.request.ext_id(), Some(key));
        if !self.originators.contains_key(&origin) {
            self.correlator.orphan(origin);
        }

        let generator = self
            .groups
            .mmc
            .identified()
            .find(|s| s.role == SessionRole::MmcGenerator)
            .map(|s| s.id);
        if let Some(generator) = generator {
            let req = MmcGenReq {
                gid,
                ne: stamped.request.req.ne.clone(),
                mmc: stamped.request.req.mmc.clone(),
                user_id: stamped.request.req.user_id.clone(),
            };
            if self.send(ctx, generator, MMC_GEN_REQ, &req) {
                self.generating.insert(gid, generator);
                return;
            }
        }
        self.queues.push_generated(GenResult::passthrough(&stamped));
        self.kick_generator();
    }

    pub fn on_generator_packet(&mut self, ctx: &mut Ctx<'_>, id: SensorId, packet: &Packet) -> HandlerResult {
        match packet.msg_id {
            MMC_GEN_RES => {
                let res: MmcGenRes = packet.decode_body()?;
                self.on_generated(ctx, id, res);
                Ok(())
            }
            CMD_COMMAND_RULE_DOWN_ACK => self.on_rule_ack(ctx, packet),
            _ => unexpected(packet),
        }
    }

    fn on_generated(&mut self, ctx: &mut Ctx<'_>, id: SensorId, res: MmcGenRes) {
        if self.generating.remove(&res.gid).is_none() {
            debug!("[mmc] Late expansion of gid {} from {}", res.gid, id);
            return;
        }
        let error = match res.result_mode {
            ResultMode::Error if res.reason.is_empty() => Some("MMC generation failed".to_string()),
            ResultMode::Error => Some(res.reason),
            _ => None,
        };
        self.queues.push_generated(GenResult {
            gid: res.gid,
            commands: res.commands,
            error,
        });
        self.kick_generator();
    }

    /// Publishes the next command of the set to the manager holding the NE's command port.
    fn dispatch_set(&mut self, ctx: &mut Ctx<'_>, mut set: MmcPublishSet) {
        let gid = set.gid;
        if !self.correlator.contains(gid) {
            debug!("[mmc] Dropping commands of finished gid {}", gid);
            return;
        }
        let Some(route) = self.router.lookup(&set.ne).cloned() else {
            self.fail_request(ctx, gid, &not_routable_message(&set.ne));
            return;
        };
        let Some(publish) = set.next_publish() else {
            self.fail_request(ctx, gid, &format!("No command generated for {}", set.ne));
            return;
        };
        if !self.send(ctx, route.session, CMD_MMC_PUBLISH_REQ, &publish) {
            self.fail_request(ctx, gid, &format!("The MANAGER({}) is not reachable", route.manager_id));
            return;
        }
        debug!("[mmc] gid {} published to MANAGER({})", gid, route.manager_id);
        self.correlator.dispatched(gid, route.session, set);
        let key = ctx.set_timer_for(
            SensorId::WORLD,
            self.settings.mmc_response_timeout,
            ServerTimer::MmcResponse { gid },
        );
        if let Some(old) = self.correlator.set_timer(gid, key) {
            ctx.cancel_timer(old);
        }
    }

    pub fn on_publish_res(&mut self, ctx: &mut Ctx<'_>, res: &MmcPublishRes) {
        if let Some(correlated) = self.correlator.on_publish_result(res) {
            self.deliver(ctx, correlated);
        }
    }

    fn deliver(&mut self, ctx: &mut Ctx<'_>, correlated: Correlated) {
        if let Some(timer) = correlated.timer {
            ctx.cancel_timer(timer);
        }
        self.send_results(ctx, correlated.origin, correlated.messages);
        if let Some(next) = correlated.next {
            self.dispatch_set(ctx, next);
        }
    }

    fn send_results(&mut self, ctx: &mut Ctx<'_>, origin: SensorId, messages: Vec<MmcRes>) {
        for message in messages {
            if !self.send(ctx, origin, AS_MMC_RES, &message) {
                return;
            }
        }
    }

    /// Ends the request with `R_ERROR`, wherever it stands.
    pub fn fail_request(&mut self, ctx: &mut Ctx<'_>, gid: u64, reason: &str) {
        self.generating.remove(&gid);
        self.queues.cancel_generation(gid);
        if let Some(correlated) = self.correlator.fail(gid, reason) {
            info!("[mmc] gid {} failed: {}", gid, reason);
            self.deliver(ctx, correlated);
        }
    }

    pub fn on_mmc_timeout(&mut self, ctx: &mut Ctx<'_>, gid: u64, key: TimerKey) {
        if let Some(correlated) = self.correlator.timeout(gid, key) {
            self.generating.remove(&gid);
            self.queues.cancel_generation(gid);
            self.deliver(ctx, correlated);
        }
    }

    /// Expansions in flight on a generator that went away fail.
    pub fn generator_lost(&mut self, ctx: &mut Ctx<'_>, id: SensorId) {
        let mut gids: Vec<u64> = self
            .generating
            .iter()
            .filter(|(_, generator)| **generator == id)
            .map(|(gid, _)| *gid)
            .collect();
        gids.sort();
        for gid in gids {
            self.fail_request(ctx, gid, "The MMC generator is disconnected");
        }
    }
}
