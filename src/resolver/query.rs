use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Instant;

use crate::protocol::types::*;

/// Everything remembered about one in-flight recursive query.
///
/// The client-facing fields are fixed at creation; the rest changes on
/// every iterative step.
#[derive(Debug, Clone)]
pub struct QueryState {
    /// The request as the client sent it, kept to form the final
    /// reply.
    pub client_message: Message,

    /// Where the final reply goes.
    pub client_addr: SocketAddr,

    /// The id the client knows this query by.  The reply must carry
    /// this id, whatever ids the iterative steps used.
    pub client_id: u16,

    /// CNAME records traversed so far, in chain order.  These are
    /// folded into the final answer.
    pub cnames: Vec<ResourceRecord>,

    /// The zone whose servers we are currently talking to; responses
    /// are only trusted for names under it.  Starts at the root.
    pub active_zone: DomainName,

    /// When the current iterative request was last put on the wire.
    pub last_sent: Instant,

    /// The current iterative request, kept verbatim for
    /// retransmission.
    pub last_request: Message,

    /// Where the current iterative request was sent.
    pub last_server: SocketAddr,

    /// Datagrams sent for the current iterative step, including the
    /// first.
    pub attempts: u32,
}

impl QueryState {
    /// The name an iterative question should ask for: the target of
    /// the last CNAME followed, or the client's original qname.
    pub fn effective_target(&self) -> DomainName {
        for rr in self.cnames.iter().rev() {
            if let RecordTypeWithData::CNAME { cname } = &rr.rtype_with_data {
                return cname.clone();
            }
        }
        self.client_message.questions[0].name.clone()
    }
}

/// Outstanding recursive queries, keyed by the iterative transaction
/// id currently on the wire for each.
///
/// Ids move to the retired set when a query advances or terminates, so
/// a late duplicate response matches neither an active entry nor
/// nothing: it is recognised and dropped silently.  The retired set is
/// bounded only by process lifetime; fine for the intended deployment.
#[derive(Debug, Default)]
pub struct QueryTable {
    active: HashMap<u16, QueryState>,
    retired: HashSet<u16>,
}

impl QueryTable {
    pub fn new() -> Self {
        Self {
            active: HashMap::new(),
            retired: HashSet::new(),
        }
    }

    /// Draw a random id in use by neither an active nor a retired
    /// query.
    pub fn fresh_id<R: Rng>(&self, rng: &mut R) -> u16 {
        loop {
            let id = rng.gen();
            if !self.active.contains_key(&id) && !self.retired.contains(&id) {
                return id;
            }
        }
    }

    pub fn insert(&mut self, iid: u16, query: QueryState) {
        self.active.insert(iid, query);
    }

    pub fn take(&mut self, iid: u16) -> Option<QueryState> {
        self.active.remove(&iid)
    }

    pub fn contains(&self, iid: u16) -> bool {
        self.active.contains_key(&iid)
    }

    pub fn retire(&mut self, iid: u16) {
        self.retired.insert(iid);
    }

    pub fn is_retired(&self, iid: u16) -> bool {
        self.retired.contains(&iid)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&u16, &mut QueryState)> {
        self.active.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
