// Copyright 2025-2026 CEMAXECUTER LLC

//! RAS replay: controller events drive a server per connection whose
//! segments are handed straight to a client, so the whole exchange can be
//! checked offline.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::json;

use cs_hci::{AntennaSwitch, CsEvent, CsRole, CsSessionManager, DisconnectionComplete, ProcedureSeed, SubeventResult};
use cs_ras::{
    parse_subevents, protocol_data_to_procedure_data, ClientAction, ClientMode, DataExchange, RasClient, RasConfig,
    RasEvent, RasServer, StepContext,
};

/// One reassembled procedure.
#[derive(Debug, Clone, Serialize)]
pub struct Delivered {
    pub handle: u16,
    pub counter: Option<u16>,
    pub bytes: usize,
    pub data_lost: bool,
    pub subevents: usize,
    pub steps: usize,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ReplayStats {
    pub events: u64,
    pub bad_events: u64,
    pub procedures: u64,
    pub delivered: u64,
    pub timeouts: u64,
    pub disconnects: u64,
}

pub struct Loopback {
    role: CsRole,
    config: RasConfig,
    sessions: CsSessionManager,
    servers: HashMap<u16, RasServer>,
    clients: HashMap<u16, RasClient>,
    pub stats: ReplayStats,
}

impl Loopback {
    pub fn new(role: CsRole, config: RasConfig) -> Self {
        Self {
            role,
            config,
            sessions: CsSessionManager::default(),
            servers: HashMap::new(),
            clients: HashMap::new(),
            stats: ReplayStats::default(),
        }
    }

    fn step_context(&self, ev: &SubeventResult) -> StepContext {
        let block = self.sessions.get(ev.handle).ok();
        StepContext {
            role: block.map(|b| b.role).unwrap_or(self.role),
            num_antenna_paths: ev.num_antenna_paths,
            sounding_sequence: block
                .and_then(|b| b.config(ev.config_id))
                .map(|c| c.rtt_type.has_sounding_sequence())
                .unwrap_or(false),
        }
    }

    /// Feed one controller event; returns JSON records to print.
    pub fn on_event(&mut self, ev: &CsEvent, now_ms: u64) -> Vec<serde_json::Value> {
        self.stats.events += 1;
        let handle = ev.handle();
        if self.sessions.get(handle).is_err() {
            self.sessions.create(handle, self.role, AntennaSwitch::single());
        }
        if let Err(e) = self.sessions.handle_event(ev) {
            log::warn!("handle {:#06x}: {}", handle, e);
        }

        let res = match ev {
            CsEvent::SubeventResult(r) => {
                if !self.servers.contains_key(&handle) {
                    let ctx = self.step_context(r);
                    self.servers.insert(handle, RasServer::new(handle, self.config.clone(), ctx));
                }
                let seed = self
                    .sessions
                    .get(handle)
                    .ok()
                    .and_then(|b| b.procedure)
                    .unwrap_or(ProcedureSeed {
                        config_id: r.config_id,
                        selected_tx_power: 0,
                        num_antenna_paths: r.num_antenna_paths,
                    });
                match self.servers.get_mut(&handle) {
                    Some(s) => s.on_subevent_result(r, &seed, now_ms),
                    None => Ok(()),
                }
            }
            CsEvent::SubeventResultContinue(c) => match self.servers.get_mut(&handle) {
                Some(s) => s.on_subevent_continue(c, now_ms),
                None => {
                    log::warn!("handle {:#06x}: continue event before any result", handle);
                    Ok(())
                }
            },
            _ => Ok(()),
        };
        if let Err(e) = res {
            self.stats.bad_events += 1;
            log::warn!("handle {:#06x}: {}", handle, e);
        }
        self.service(now_ms)
    }

    /// The connection is gone: its control block, stored procedures and any
    /// partial reassembly are dropped.
    pub fn on_disconnect(&mut self, ev: &DisconnectionComplete, now_ms: u64) -> Vec<serde_json::Value> {
        self.stats.events += 1;
        let mut out = self.service(now_ms);
        if ev.status != 0 {
            log::debug!("handle {:#06x}: failed disconnection ({:#04x})", ev.handle, ev.status);
            return out;
        }
        self.stats.disconnects += 1;
        self.sessions.reset_by_handle(ev.handle);
        if let Some(server) = self.servers.get_mut(&ev.handle) {
            server.reset();
        }
        if let Some(client) = self.clients.get_mut(&ev.handle) {
            client.reset();
        }
        out.push(json!({ "time_ms": now_ms, "handle": ev.handle, "disconnected": ev.reason }));
        out
    }

    /// Run timers and move data from servers to clients.
    pub fn service(&mut self, now_ms: u64) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        let mut handles: Vec<u16> = self.servers.keys().copied().collect();
        handles.sort_unstable();
        for handle in handles {
            self.service_handle(handle, now_ms, &mut out);
        }
        out
    }

    fn service_handle(&mut self, handle: u16, now_ms: u64, out: &mut Vec<serde_json::Value>) {
        let mode = match self.config.mechanism {
            DataExchange::Realtime => Some(ClientMode::Realtime),
            DataExchange::OnDemand => Some(ClientMode::OnDemand),
            DataExchange::Local => None,
        };
        let timeouts = self.config.timeouts_enabled;
        let Some(server) = self.servers.get_mut(&handle) else {
            return;
        };
        server.poll(now_ms);

        let mut actions = Vec::new();
        let mut events = server.drain_events();
        if let Some(mode) = mode {
            let client = self.clients.entry(handle).or_insert_with(|| RasClient::new(mode, timeouts));
            for ev in &events {
                let res = match (mode, ev) {
                    (ClientMode::OnDemand, RasEvent::DataReady { counter }) => client.on_data_ready(*counter, now_ms),
                    (ClientMode::Realtime, RasEvent::ProcedureComplete { counter, .. }) => {
                        client.expect_ranging_data(*counter, now_ms);
                        Ok(Vec::new())
                    }
                    _ => Ok(Vec::new()),
                };
                match res {
                    Ok(a) => actions.extend(a),
                    Err(e) => log::warn!("handle {:#06x}: {}", handle, e),
                }
            }
            if mode == ClientMode::Realtime {
                for seg in server.realtime_segments() {
                    match client.on_segment(&seg, now_ms) {
                        Ok(a) => actions.extend(a),
                        Err(e) => log::warn!("handle {:#06x}: {}", handle, e),
                    }
                }
                events.extend(server.drain_events());
            }

            // on-demand exchange runs until the client has nothing left to ask
            while !actions.is_empty() {
                let mut next = Vec::new();
                for action in actions {
                    let segs = match action {
                        ClientAction::GetRangingData { counter } => server.segments(counter),
                        ClientAction::RequestLostSegments { counter: Some(counter), ref ranges } => {
                            let mut all = Vec::new();
                            for &(s, e) in ranges {
                                match server.retrieve_lost_segments(counter, s, e) {
                                    Ok(v) => all.extend(v),
                                    Err(err) => log::warn!("handle {:#06x}: {}", handle, err),
                                }
                            }
                            Ok(all)
                        }
                        ClientAction::RequestLostSegments { counter: None, .. } => Ok(Vec::new()),
                        ClientAction::Ack { counter } => {
                            if let Err(e) = server.ack(counter) {
                                log::warn!("handle {:#06x}: {}", handle, e);
                            }
                            Ok(Vec::new())
                        }
                        ClientAction::Complete(data) => {
                            let channels: Vec<u8> = data
                                .counter
                                .and_then(|c| server.procedure(c))
                                .map(|p| p.subevents.iter().flat_map(|se| se.steps.iter().map(|s| s.channel)).collect())
                                .unwrap_or_default();
                            let (subevents, steps) = match protocol_data_to_procedure_data(
                                &data.payload,
                                &server.step_context(),
                                &self.config.filter,
                                &channels,
                            ) {
                                Ok((_, proc_data)) => match parse_subevents(&proc_data) {
                                    Ok(se) => (se.len(), se.iter().map(|s| s.steps.len()).sum()),
                                    Err(_) => (0, 0),
                                },
                                Err(e) => {
                                    log::debug!("handle {:#06x}: ranging data not decodable: {}", handle, e);
                                    (0, 0)
                                }
                            };
                            self.stats.delivered += 1;
                            let d = Delivered {
                                handle,
                                counter: data.counter,
                                bytes: data.payload.len(),
                                data_lost: data.data_lost,
                                subevents,
                                steps,
                            };
                            out.push(json!({ "delivered": d }));
                            Ok(Vec::new())
                        }
                    };
                    match segs {
                        Ok(segs) => {
                            for seg in segs {
                                match client.on_segment(&seg, now_ms) {
                                    Ok(a) => next.extend(a),
                                    Err(e) => log::warn!("handle {:#06x}: {}", handle, e),
                                }
                            }
                        }
                        Err(e) => log::warn!("handle {:#06x}: {}", handle, e),
                    }
                }
                actions = next;
            }
            client.poll(now_ms);
            events.extend(client.drain_events());
        } else {
            for ev in &events {
                if let RasEvent::ProcedureComplete { counter, .. } = ev {
                    if let Ok(p) = server.take_local(*counter) {
                        self.stats.delivered += 1;
                        let d = Delivered {
                            handle,
                            counter: Some(p.counter()),
                            bytes: p.data_len(),
                            data_lost: p.aborted,
                            subevents: p.subevent_count(),
                            steps: p.subevents.iter().map(|s| s.steps.len()).sum(),
                        };
                        out.push(json!({ "delivered": d }));
                    }
                }
            }
        }

        for ev in events {
            match ev {
                RasEvent::ProcedureComplete { .. } => self.stats.procedures += 1,
                RasEvent::Timeout { .. } => self.stats.timeouts += 1,
                _ => {}
            }
            out.push(json!({ "time_ms": now_ms, "handle": handle, "ras": ev }));
        }
    }
}
