//! The resolution state machine.
//!
//! One `Resolver` owns all per-query state.  It never touches the
//! network: `handle_datagram` and `sweep` return the datagrams to
//! send, and the server loop puts them on the wire.  Time is also
//! passed in.  Both choices keep the whole machine exercisable from
//! plain unit tests.
//!
//! A request is answered from the zone (authoritatively), from the
//! cache, or by starting an iterative descent from the root server.
//! Each descent step sends one question under a fresh transaction id;
//! the response advances the query (closer nameserver, or a CNAME
//! restart at the root) or finishes it.  Steps are retransmitted on a
//! one-second timer and abandoned after seven attempts.

pub mod bailiwick;
pub mod cache;
pub mod compose;
pub mod query;
pub mod trace;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use crate::protocol::types::*;
use crate::zones::ZoneStore;

use self::cache::Cache;
use self::query::{QueryState, QueryTable};
use self::trace::QueryTrace;

/// Port iterative queries are sent to on remote name servers.  This
/// is a test-harness convention; real-world deployments use 53.
pub const UPSTREAM_PORT: u16 = 60053;

/// How long to wait for an upstream response before retransmitting.
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Retransmissions allowed per iterative step.  One initial send plus
/// these, and then the query fails.
const MAX_RETRANSMITS: u32 = 6;

/// Maximum CNAMEs followed for one query, to protect against an
/// upstream serving an endless chain.
const CNAME_CHAIN_LIMIT: usize = 32;

/// A datagram for the server loop to send.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub message: Message,
    pub target: SocketAddr,
}

pub struct Resolver {
    zone: ZoneStore,
    cache: Cache,
    table: QueryTable,
    root: SocketAddr,
    upstream_port: u16,
    trace: QueryTrace,
}

impl Resolver {
    pub fn new(
        zone: ZoneStore,
        root_ip: Ipv4Addr,
        upstream_port: u16,
        trace: QueryTrace,
    ) -> Self {
        Self {
            zone,
            cache: Cache::new(),
            table: QueryTable::new(),
            root: SocketAddr::new(IpAddr::V4(root_ip), upstream_port),
            upstream_port,
            trace,
        }
    }

    /// Process one received datagram, returning whatever should be
    /// sent in reaction to it.
    pub fn handle_datagram(&mut self, octets: &[u8], peer: SocketAddr, now: Instant) -> Vec<Outbound> {
        match Message::from_octets(octets) {
            Ok(message) if message.header.is_response => self.handle_response(message, now),
            Ok(message) => self.handle_request(message, peer, now),
            Err(error) => {
                tracing::debug!(?peer, ?error, "dropping malformed datagram");
                Vec::new()
            }
        }
    }

    /// A request from a client: answer from the zone, from the cache,
    /// or start recursion.
    fn handle_request(&mut self, request: Message, peer: SocketAddr, now: Instant) -> Vec<Outbound> {
        if request.header.opcode != Opcode::Standard {
            tracing::debug!(?peer, opcode = ?request.header.opcode, "ignoring non-standard query");
            return Vec::new();
        }
        if request.questions.len() != 1 {
            tracing::debug!(?peer, questions = request.questions.len(), "dropping request without exactly one question");
            return Vec::new();
        }

        self.cache.sweep(now);

        let question = request.questions[0].clone();

        if self.zone.is_local(&question.name) {
            tracing::info!(%question, ?peer, "authoritative request");
            let mut response = compose::build_response(&request, self.zone.all_records(), true);
            if response.answers.is_empty() {
                response.header.rcode = Rcode::NameError;
            }
            return vec![Outbound {
                message: response,
                target: peer,
            }];
        }

        if self.cache.get(&question.name, question.qtype, now).is_some() {
            tracing::info!(%question, ?peer, "answering from cache");
            let pool = self.cache.snapshot(now);
            let response = compose::build_response(&request, &pool, false);
            return vec![Outbound {
                message: response,
                target: peer,
            }];
        }

        if !request.header.recursion_desired {
            tracing::info!(%question, ?peer, "refusing iterative request for non-local name");
            return vec![servfail(&request, peer)];
        }

        self.begin_recursion(request, peer, now)
    }

    fn begin_recursion(&mut self, request: Message, peer: SocketAddr, now: Instant) -> Vec<Outbound> {
        let question = request.questions[0].clone();
        let client_id = request.header.id;
        tracing::info!(%question, ?peer, client_id, "starting recursion");
        self.trace
            .append(client_id, &format!("query '{question}' from {peer}"));

        let iid = self.table.fresh_id(&mut rand::thread_rng());
        let iterative = Message::from_question(iid, question.clone());
        self.trace.append(
            client_id,
            &format!(
                "asking root server {} for '{}' (txn {iid})",
                self.root, question.name
            ),
        );

        self.table.insert(
            iid,
            QueryState {
                client_message: request,
                client_addr: peer,
                client_id,
                cnames: Vec::new(),
                active_zone: DomainName::root_domain(),
                last_sent: now,
                last_request: iterative.clone(),
                last_server: self.root,
                attempts: 1,
            },
        );

        vec![Outbound {
            message: iterative,
            target: self.root,
        }]
    }

    /// A response from an upstream nameserver: advance or finish the
    /// query it belongs to.
    fn handle_response(&mut self, mut response: Message, now: Instant) -> Vec<Outbound> {
        let iid = response.header.id;

        if self.table.is_retired(iid) {
            // late duplicate of a response we already acted on
            return Vec::new();
        }

        let Some(mut query) = self.table.take(iid) else {
            tracing::debug!(iid, "dropping response with unknown transaction id");
            return Vec::new();
        };
        self.table.retire(iid);

        let dropped = bailiwick::filter_response(&query.active_zone, &mut response);
        if !dropped.is_empty() {
            tracing::debug!(
                iid,
                zone = %query.active_zone,
                count = dropped.len(),
                "dropped out-of-bailiwick records"
            );
            for rr in &dropped {
                self.trace.append(
                    query.client_id,
                    &format!(
                        "dropped out-of-bailiwick record '{}' (zone '{}')",
                        rr.name, query.active_zone
                    ),
                );
            }
        }

        for rr in response
            .answers
            .iter()
            .chain(&response.authority)
            .chain(&response.additional)
        {
            self.cache.put(rr, now);
        }

        let qtype = query.client_message.questions[0].qtype;

        if response.header.rcode == Rcode::ServerFailure {
            self.trace
                .append(query.client_id, "upstream returned server-failure");
            return vec![self.fail(query)];
        }

        if response.answers.is_empty()
            && response.authority.is_empty()
            && response.additional.is_empty()
        {
            let rcode = if response.header.rcode == Rcode::NameError {
                Rcode::NameError
            } else {
                Rcode::NoError
            };
            self.trace
                .append(query.client_id, "upstream response is empty, replying as-is");
            return vec![self.finish(query, Vec::new(), rcode)];
        }

        if response.header.is_authoritative {
            if response.answers.iter().any(|rr| rr.rtype() == qtype) {
                self.trace.append(
                    query.client_id,
                    &format!("got authoritative answer from {}", query.last_server),
                );
                let mut pool = query.cnames.clone();
                pool.append(&mut response.answers);
                pool.append(&mut response.authority);
                pool.append(&mut response.additional);
                return vec![self.finish(query, pool, Rcode::NoError)];
            }

            let only_cnames = !response.answers.is_empty()
                && response
                    .answers
                    .iter()
                    .all(|rr| rr.rtype() == RecordType::CNAME);
            if only_cnames {
                return self.chase_cname(query, response, now);
            }

            self.trace.append(
                query.client_id,
                "authoritative response matches neither question nor CNAME",
            );
            return vec![self.fail(query)];
        }

        if let Some((glue_address, zone)) = find_referral(&response) {
            return self.advance_zone(query, glue_address, zone, now);
        }

        self.trace
            .append(query.client_id, "response is neither answer nor usable referral");
        vec![self.fail(query)]
    }

    /// The upstream answered with an alias: restart resolution at the
    /// root for the CNAME target, remembering the chain so far.
    fn chase_cname(&mut self, mut query: QueryState, response: Message, now: Instant) -> Vec<Outbound> {
        let Some(target) = response.answers.iter().find_map(|rr| match &rr.rtype_with_data {
            RecordTypeWithData::CNAME { cname } => Some(cname.clone()),
            _ => None,
        }) else {
            return vec![self.fail(query)];
        };

        query.cnames.extend(response.answers.iter().cloned());
        if query.cnames.len() > CNAME_CHAIN_LIMIT {
            self.trace
                .append(query.client_id, "CNAME chain too long, giving up");
            return vec![self.fail(query)];
        }

        query.active_zone = DomainName::root_domain();

        let question = Question {
            name: target.clone(),
            qtype: query.client_message.questions[0].qtype,
            qclass: query.client_message.questions[0].qclass,
        };
        let iid = self.table.fresh_id(&mut rand::thread_rng());
        let iterative = Message::from_question(iid, question);

        self.trace.append(
            query.client_id,
            &format!("following CNAME to '{target}', restarting at the root (txn {iid})"),
        );

        query.last_request = iterative.clone();
        query.last_server = self.root;
        query.last_sent = now;
        query.attempts = 1;
        self.table.insert(iid, query);

        vec![Outbound {
            message: iterative,
            target: self.root,
        }]
    }

    /// The upstream delegated to a closer nameserver: narrow the
    /// active zone and re-ask there.
    fn advance_zone(
        &mut self,
        mut query: QueryState,
        glue_address: Ipv4Addr,
        zone: DomainName,
        now: Instant,
    ) -> Vec<Outbound> {
        let question = Question {
            name: query.effective_target(),
            qtype: query.client_message.questions[0].qtype,
            qclass: query.client_message.questions[0].qclass,
        };
        let iid = self.table.fresh_id(&mut rand::thread_rng());
        let iterative = Message::from_question(iid, question);
        let server = SocketAddr::new(IpAddr::V4(glue_address), self.upstream_port);

        self.trace.append(
            query.client_id,
            &format!("referred to zone '{zone}', asking {server} (txn {iid})"),
        );

        query.active_zone = zone;
        query.last_request = iterative.clone();
        query.last_server = server;
        query.last_sent = now;
        query.attempts = 1;
        self.table.insert(iid, query);

        vec![Outbound {
            message: iterative,
            target: server,
        }]
    }

    /// Send the client its final answer, composed from the given
    /// record pool.
    fn finish(&mut self, query: QueryState, pool: Vec<ResourceRecord>, rcode: Rcode) -> Outbound {
        let mut response = compose::build_response(&query.client_message, &pool, true);
        // composed like an authority's answer (so CNAME chains fold
        // in), but the reply itself is relayed, not ours
        response.header.is_authoritative = false;
        response.header.rcode = rcode;

        self.trace.append(
            query.client_id,
            &format!(
                "replying to {} with {} answer record(s), rcode {}",
                query.client_addr,
                response.answers.len(),
                rcode
            ),
        );

        Outbound {
            message: response,
            target: query.client_addr,
        }
    }

    /// Give up on a query and tell the client.
    fn fail(&mut self, query: QueryState) -> Outbound {
        self.trace.append(
            query.client_id,
            &format!("replying server-failure to {}", query.client_addr),
        );
        servfail(&query.client_message, query.client_addr)
    }

    /// Timer pass: retransmit aged queries, fail exhausted ones.
    pub fn sweep(&mut self, now: Instant) -> Vec<Outbound> {
        let mut outbound = Vec::new();
        let mut exhausted = Vec::new();

        for (iid, query) in self.table.iter_mut() {
            if now.saturating_duration_since(query.last_sent) <= RETRY_INTERVAL {
                continue;
            }

            if query.attempts <= MAX_RETRANSMITS {
                query.attempts += 1;
                query.last_sent = now;
                // same transaction id, so the response still matches
                self.trace.append(
                    query.client_id,
                    &format!(
                        "no answer from {}, retransmitting (attempt {})",
                        query.last_server, query.attempts
                    ),
                );
                outbound.push(Outbound {
                    message: query.last_request.clone(),
                    target: query.last_server,
                });
            } else {
                exhausted.push(*iid);
            }
        }

        for iid in exhausted {
            if let Some(query) = self.table.take(iid) {
                self.table.retire(iid);
                tracing::info!(
                    iid,
                    client_id = query.client_id,
                    "query timed out"
                );
                self.trace
                    .append(query.client_id, "no answer after 7 attempts, giving up");
                outbound.push(self.fail(query));
            }
        }

        outbound
    }

    #[cfg(test)]
    fn outstanding_queries(&self) -> usize {
        self.table.len()
    }
}

/// A server-failure reply to a request.
fn servfail(request: &Message, peer: SocketAddr) -> Outbound {
    let mut response = request.make_response();
    response.header.rcode = Rcode::ServerFailure;
    Outbound {
        message: response,
        target: peer,
    }
}

/// If the response is a referral (NS records in authority), find the
/// first additional A record gluing one of those nameservers, and
/// return its address together with the delegated zone.
fn find_referral(response: &Message) -> Option<(Ipv4Addr, DomainName)> {
    let ns_rrs: Vec<&ResourceRecord> = response
        .authority
        .iter()
        .filter(|rr| rr.rtype() == RecordType::NS)
        .collect();
    if ns_rrs.is_empty() {
        return None;
    }

    for ar in &response.additional {
        let RecordTypeWithData::A { address } = &ar.rtype_with_data else {
            continue;
        };
        for ns in &ns_rrs {
            if let RecordTypeWithData::NS { nsdname } = &ns.rtype_with_data {
                if *nsdname == ar.name {
                    return Some((*address, ns.name.clone()));
                }
            }
        }
    }

    None
}
