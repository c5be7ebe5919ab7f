//! Per-node protocol state machine.
//!
//! The engine is synchronous: it never waits. The node runtime
//! ([`crate::node`]) owns the waiting. It only calls [`ProtocolEngine::handle`]
//! and [`ProtocolEngine::retransmit`] while the node is passive and the
//! node's lock is held, so the application can't become active mid-step.
//!
//! Token lifecycle at one node:
//! ```text
//! Idle --receive--> Holding --handle--> Forwarded --receive--> Holding ...
//!                                  \--> Terminated
//! ```

use crate::observer::{FailureObserver, LastToken, Recovery};
use crate::state::NodeState;
use crate::token::Token;
use crate::NodeId;
use std::fmt;
use tracing::{debug, info};

/// Where this node is in the token lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No token seen yet
    Idle,
    /// A token was accepted and is being processed
    Holding,
    /// The last token was forwarded; waiting for the next one
    Forwarded,
    /// This node announced termination
    Terminated,
}

/// Why a token was not accepted. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dropped {
    /// This node has crashed; the sender didn't know yet
    NodeCrashed,
    /// Sequence doesn't follow the last accepted one (stale, duplicate or reordered)
    StaleSequence { expected: u64, received: u64 },
    /// Termination was already announced here
    AlreadyTerminated,
}

impl fmt::Display for Dropped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dropped::NodeCrashed => write!(f, "node is crashed"),
            Dropped::StaleSequence { expected, received } => {
                write!(f, "stale sequence {received}, expected {expected}")
            }
            Dropped::AlreadyTerminated => write!(f, "termination already announced"),
        }
    }
}

/// What the runtime must do after a protocol step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send `token` to `to`
    Forward { to: NodeId, token: Token },
    /// Quiescence detected; announce now
    Announce,
    /// Every other node crashed; announce once this node is passive
    AnnounceWhenPassive,
    /// The token may be lost; call [`ProtocolEngine::retransmit`] once passive
    RetransmitWhenPassive(LastToken),
}

/// Result of a successor repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    Successor(NodeId),
    /// No alive node other than this one remains
    Alone,
}

pub struct ProtocolEngine {
    state: NodeState,
    observer: FailureObserver,
    phase: Phase,
}

impl ProtocolEngine {
    pub fn new(id: NodeId, ring_size: usize) -> Self {
        Self::with_origin(id, ring_size, NodeId::new(0))
    }

    /// Engine for a run bootstrapped by `origin`.
    pub fn with_origin(id: NodeId, ring_size: usize, origin: NodeId) -> Self {
        let mut engine = Self {
            state: NodeState::with_origin(id, ring_size, origin),
            observer: FailureObserver::new(),
            phase: Phase::Idle,
        };
        engine.expect_bootstrap();
        engine
    }

    fn expect_bootstrap(&mut self) {
        let origin = self.state.origin();
        if self.id() != origin {
            let token = Token::bootstrap(origin, self.state.ring_size());
            self.observer.expect_bootstrap(origin, &token);
        }
    }

    pub fn id(&self) -> NodeId {
        self.state.id()
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    pub fn observer(&self) -> &FailureObserver {
        &self.observer
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Return to the initial state for a new run.
    pub fn reset(&mut self) {
        self.state.reset();
        self.observer.reset();
        self.phase = Phase::Idle;
        self.expect_bootstrap();
    }

    /// Validate an inbound token and fold its crash set into CRASHED.
    ///
    /// A rejected token leaves the node untouched.
    pub fn receive(&mut self, mut token: Token) -> Result<Token, Dropped> {
        if self.state.is_crashed() {
            return Err(Dropped::NodeCrashed);
        }
        if self.phase == Phase::Terminated {
            return Err(Dropped::AlreadyTerminated);
        }

        let expected = self.state.sequence() + 1;
        if token.sequence() != expected {
            return Err(Dropped::StaleSequence {
                expected,
                received: token.sequence(),
            });
        }

        token.remove_crashed(self.state.crashed());
        self.state.merge_crashed(token.crashed().iter().copied());
        // Any accepted token has already left the origin.
        self.observer.forget_bootstrap();
        self.phase = Phase::Holding;

        debug!(
            node = %self.id(),
            sequence = token.sequence(),
            sender = %token.sender(),
            black = %token.black(),
            "Accepted token"
        );
        Ok(token)
    }

    /// Process an accepted token. The node must be passive.
    pub fn handle(&mut self, mut token: Token) -> Outcome {
        debug_assert!(self.state.is_passive(), "handle called while active");
        let id = self.id();

        let black = self.state.furthest(self.state.black(), token.black());
        self.state.set_black(black);

        self.state.drop_reported(token.crashed());

        if self.state.black() == id || self.state.report().is_empty() {
            token.set_count(id, self.state.alive_count_sum());
        }

        if self.state.black() == id && self.state.report().is_empty() {
            let sum: i64 = self.state.alive_ids().map(|i| token.count(i)).sum();
            if sum == 0 {
                self.phase = Phase::Terminated;
                return Outcome::Announce;
            }
            debug!(node = %id, sum, "Termination check failed");
        }

        if token.crashed().contains(&self.state.successor())
            && self.repair_successor() == Repair::Alone
        {
            self.phase = Phase::Terminated;
            return Outcome::Announce;
        }

        let to = self.state.successor();
        if to < id {
            token.advance_sequence();
        }

        if self.state.report().is_empty() {
            token.clear_report();
            token.set_black(self.state.furthest(self.state.black(), to));
        } else {
            let report = self.state.take_report();
            info!(node = %id, crashed = ?report, "Reporting crashes");
            token.union_crashed(report.iter().copied());
            token.set_report(report);
            token.set_black(id);
        }

        token.set_sender(id);
        self.state.set_black(id);
        self.state.advance_sequence();
        self.observer.record_snapshot(to, &token);
        self.phase = Phase::Forwarded;

        Outcome::Forward { to, token }
    }

    /// Point the successor at the next id not known to be crashed.
    pub fn repair_successor(&mut self) -> Repair {
        let id = self.id();
        let n = self.state.ring_size();

        let mut next = self.state.successor().next(n);
        for _ in 0..n {
            if next == id || !self.state.knows_crashed(next) {
                break;
            }
            next = next.next(n);
        }
        self.state.set_successor(next);

        if next == id {
            info!(node = %id, "All other nodes crashed");
            return Repair::Alone;
        }

        if self.state.black() != id {
            let black = self.state.furthest(self.state.black(), next);
            self.state.set_black(black);
        }
        info!(node = %id, successor = %next, "Repaired successor");
        Repair::Successor(next)
    }

    /// Fold a crash notification in, returning the follow-up work.
    pub fn observe_crash(&mut self, crashed: NodeId) -> Vec<Outcome> {
        if self.state.is_crashed() || self.phase == Phase::Terminated {
            return Vec::new();
        }

        let mut outcomes = Vec::new();
        for action in self.observer.observe_crash(&mut self.state, crashed) {
            match action {
                Recovery::RepairSuccessor => {
                    if self.repair_successor() == Repair::Alone {
                        return vec![Outcome::AnnounceWhenPassive];
                    }
                }
                Recovery::Retransmit(last) => {
                    outcomes.push(Outcome::RetransmitWhenPassive(last));
                }
            }
        }
        outcomes
    }

    /// Resend a token that may have died with its recipient. The node must be passive.
    ///
    /// Pending crash reports are folded in and this node re-anchors itself as
    /// black, so the next termination check happens only after a full lap.
    /// Returns `None` if a newer token has been forwarded in the meantime.
    pub fn retransmit(&mut self, last: LastToken) -> Option<Outcome> {
        debug_assert!(self.state.is_passive(), "retransmit called while active");
        if self.state.is_crashed()
            || self.phase == Phase::Terminated
            || self.observer.last_token().is_some()
        {
            return None;
        }
        let id = self.id();
        let LastToken {
            destination,
            mut token,
        } = last;

        let mut report = self.state.take_report();
        report.insert(destination);
        self.state.merge_crashed([destination]);
        token.union_crashed(report.iter().copied());
        token.set_report(report);

        if self.state.knows_crashed(self.state.successor())
            && self.repair_successor() == Repair::Alone
        {
            self.phase = Phase::Terminated;
            return Some(Outcome::Announce);
        }

        let to = self.state.successor();
        if to < id && destination > id {
            token.advance_sequence();
        }

        token.set_black(id);
        token.set_sender(id);
        self.state.set_black(id);
        self.observer.record_snapshot(to, &token);

        info!(node = %id, to = %to, lost_at = %destination, "Retransmitting token");
        Some(Outcome::Forward { to, token })
    }

    /// Record that the degenerate single-survivor announcement happened.
    pub fn mark_terminated(&mut self) {
        self.phase = Phase::Terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn id(n: u32) -> NodeId {
        NodeId::new(n)
    }

    fn set(ids: &[u32]) -> BTreeSet<NodeId> {
        ids.iter().copied().map(NodeId::new).collect()
    }

    /// Build a ring of passive engines.
    fn ring(n: usize) -> Vec<ProtocolEngine> {
        NodeId::all(n)
            .map(|i| {
                let mut engine = ProtocolEngine::new(i, n);
                engine.state_mut().set_passive();
                engine
            })
            .collect()
    }

    /// Deliver `token` to `to` and keep forwarding until someone announces.
    ///
    /// Returns the announcing node, or `None` if the token was dropped or
    /// `max_hops` ran out.
    fn pump(
        engines: &mut [ProtocolEngine],
        mut token: Token,
        mut to: NodeId,
        max_hops: usize,
    ) -> Option<NodeId> {
        for _ in 0..max_hops {
            let engine = &mut engines[to.index()];
            let accepted = engine.receive(token).ok()?;
            match engine.handle(accepted) {
                Outcome::Forward { to: next, token: t } => {
                    token = t;
                    to = next;
                }
                Outcome::Announce => return Some(engine.id()),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        None
    }

    /// Follow successors from `from` until the walk returns there.
    fn successor_walk(engines: &[ProtocolEngine], from: NodeId) -> Vec<NodeId> {
        let mut walk = vec![from];
        let mut next = engines[from.index()].state().successor();
        while next != from {
            assert!(walk.len() <= engines.len(), "successor chain never returns to {from}");
            walk.push(next);
            next = engines[next.index()].state().successor();
        }
        walk
    }

    /// Take one hop and return what was forwarded.
    fn step(engine: &mut ProtocolEngine, token: Token) -> (NodeId, Token) {
        let accepted = engine.receive(token).expect("token accepted");
        match engine.handle(accepted) {
            Outcome::Forward { to, token } => (to, token),
            other => panic!("expected forward, got {other:?}"),
        }
    }

    // ==================== receive ====================

    #[test]
    fn test_receive_accepts_next_sequence() {
        let mut engine = ProtocolEngine::new(id(0), 3);
        let token = engine.receive(Token::bootstrap(id(0), 3)).unwrap();
        assert_eq!(token.sequence(), 1);
        assert_eq!(engine.phase(), Phase::Holding);
    }

    #[test]
    fn test_receive_rejects_wrong_sequence() {
        let mut engine = ProtocolEngine::new(id(1), 3);
        let mut token = Token::bootstrap(id(0), 3);
        token.advance_sequence();

        let result = engine.receive(token);
        assert_eq!(
            result,
            Err(Dropped::StaleSequence {
                expected: 1,
                received: 2
            })
        );
        assert_eq!(engine.phase(), Phase::Idle);
    }

    #[test]
    fn test_receive_on_crashed_node_is_noop() {
        let mut engine = ProtocolEngine::new(id(1), 3);
        engine.state_mut().mark_crashed();
        let before = engine.state().clone();

        assert_eq!(
            engine.receive(Token::bootstrap(id(0), 3)),
            Err(Dropped::NodeCrashed)
        );
        assert_eq!(engine.state(), &before);
    }

    #[test]
    fn test_receive_prunes_known_crashes_and_merges_new_ones() {
        let mut engine = ProtocolEngine::new(id(0), 5);
        engine.state_mut().merge_crashed([id(2)]);
        engine.state_mut().observe_crash(id(3));

        let mut token = Token::bootstrap(id(0), 5);
        token.union_crashed([id(2), id(3), id(4)]);
        let token = engine.receive(token).unwrap();

        assert_eq!(token.crashed(), &set(&[3, 4]));
        assert_eq!(engine.state().crashed(), &set(&[2, 3, 4]));
        assert!(engine.state().report().is_empty());
    }

    // ==================== handle ====================

    #[test]
    fn test_first_hop_does_not_check_termination() {
        let mut engines = ring(3);
        let (to, token) = step(&mut engines[0], Token::bootstrap(id(0), 3));

        assert_eq!(to, id(1));
        assert_eq!(token.sender(), id(0));
        assert_eq!(token.sequence(), 1);
        // Node 2 is still the furthest black node seen from 0.
        assert_eq!(token.black(), id(2));
        assert_eq!(engines[0].state().sequence(), 1);
        assert_eq!(engines[0].state().black(), id(0));
        assert_eq!(engines[0].phase(), Phase::Forwarded);
    }

    #[test]
    fn test_sequence_advances_on_wrap() {
        let mut engine = ProtocolEngine::new(id(2), 3);
        engine.state_mut().set_passive();
        engine.state_mut().advance_sequence();

        let mut token = Token::bootstrap(id(0), 3);
        token.advance_sequence();
        token.set_black(id(0));

        let (to, token) = step(&mut engine, token);
        assert_eq!(to, id(0));
        assert_eq!(token.sequence(), 3);
    }

    #[test]
    fn test_quiescent_ring_announces_once() {
        // Three nodes, no messages, all passive.
        let mut engines = ring(3);
        let announcer = pump(&mut engines, Token::bootstrap(id(0), 3), id(0), 10);

        assert_eq!(announcer, Some(id(2)));
        assert_eq!(engines[2].phase(), Phase::Terminated);
        // Nothing else may be accepted afterwards.
        let mut late = Token::bootstrap(id(0), 3);
        late.advance_sequence();
        assert_eq!(engines[2].receive(late), Err(Dropped::AlreadyTerminated));
    }

    #[test]
    fn test_ring_with_nonzero_origin() {
        let origin = id(3);
        let mut engines: Vec<_> = NodeId::all(5)
            .map(|i| {
                let mut engine = ProtocolEngine::with_origin(i, 5, origin);
                engine.state_mut().set_passive();
                engine
            })
            .collect();

        let announcer = pump(&mut engines, Token::bootstrap(origin, 5), origin, 10);
        assert_eq!(announcer, Some(id(2)));
        assert!(engines.iter().all(|e| e.phase() != Phase::Idle));
    }

    #[test]
    fn test_in_flight_message_blocks_termination() {
        let mut engines = ring(3);
        // Node 0 sent a message to node 1 that hasn't arrived.
        engines[0].state_mut().record_send(id(1));

        let token = Token::bootstrap(id(0), 3);
        let (to, token) = step(&mut engines[0], token);
        let (to, token) = step(&mut engines[to.index()], token);
        // Node 2 is black and checks, but the count sum is 1.
        let (to, token) = step(&mut engines[to.index()], token);
        assert_eq!(to, id(0));
        assert_eq!(token.count(id(0)), 1);
        // After a failed check the successor becomes the next checker.
        assert_eq!(token.black(), id(0));
    }

    #[test]
    fn test_delivered_message_allows_termination() {
        let mut engines = ring(3);
        engines[0].state_mut().record_send(id(2));
        engines[2].state_mut().record_receive(id(0));
        engines[2].state_mut().set_passive();

        let announcer = pump(&mut engines, Token::bootstrap(id(0), 3), id(0), 20);
        assert!(announcer.is_some());
    }

    #[test]
    fn test_late_receipt_forces_another_lap() {
        let mut engines = ring(3);
        let (to, token) = step(&mut engines[0], Token::bootstrap(id(0), 3));

        // Node 1 already forwarded when 2 sends it a message.
        let (to, token) = step(&mut engines[to.index()], token);
        engines[2].state_mut().record_send(id(1));
        engines[1].state_mut().record_receive(id(2));
        engines[1].state_mut().set_passive();

        // Node 2 checks: its +1 is counted but node 1's -1 isn't yet.
        let (to, token) = step(&mut engines[to.index()], token);
        assert_eq!(to, id(0));

        let announcer = pump(&mut engines, token, to, 20);
        assert!(announcer.is_some());
        let total: i64 = engines.iter().map(|e| e.state().alive_count_sum()).sum();
        assert_eq!(total, 0);
    }

    #[test]
    fn test_report_is_folded_into_token() {
        let mut engines = ring(4);
        engines[0].state_mut().observe_crash(id(2));

        let (to, token) = step(&mut engines[0], Token::bootstrap(id(0), 4));
        assert_eq!(to, id(1));
        assert_eq!(token.crashed(), &set(&[2]));
        assert_eq!(token.report(), &set(&[2]));
        assert_eq!(token.black(), id(0));
        assert!(engines[0].state().report().is_empty());
        assert_eq!(engines[0].state().crashed(), &set(&[2]));
    }

    #[test]
    fn test_pending_report_blocks_termination_check() {
        let mut engines = ring(2);
        engines[1].state_mut().advance_sequence();
        engines[1].state_mut().observe_crash(id(0));

        let mut token = Token::bootstrap(id(0), 2);
        token.advance_sequence();
        token.set_black(id(1));
        // Black and zero-sum, but REPORT is not empty.
        let accepted = engines[1].receive(token).unwrap();
        let outcome = engines[1].handle(accepted);
        assert_ne!(outcome, Outcome::Announce);
    }

    #[test]
    fn test_known_crashed_successor_is_skipped() {
        let mut engines = ring(4);
        let mut token = Token::bootstrap(id(0), 4);
        token.union_crashed([id(1)]);

        let (to, token) = step(&mut engines[0], token);
        assert_eq!(to, id(2));
        assert_eq!(engines[0].state().successor(), id(2));
        assert_eq!(token.crashed(), &set(&[1]));
    }

    // ==================== repair ====================

    #[test]
    fn test_repair_skips_crashed_and_reported() {
        let mut engine = ProtocolEngine::new(id(0), 5);
        engine.state_mut().merge_crashed([id(1)]);
        engine.state_mut().observe_crash(id(2));

        assert_eq!(engine.repair_successor(), Repair::Successor(id(3)));
        assert_eq!(engine.state().successor(), id(3));
    }

    #[test]
    fn test_repair_wraps_around() {
        let mut engine = ProtocolEngine::new(id(2), 4);
        engine.state_mut().merge_crashed([id(3)]);
        assert_eq!(engine.repair_successor(), Repair::Successor(id(0)));
    }

    #[test]
    fn test_repair_alone() {
        let mut engine = ProtocolEngine::new(id(0), 3);
        engine.state_mut().merge_crashed([id(1), id(2)]);
        assert_eq!(engine.repair_successor(), Repair::Alone);
        assert_eq!(engine.state().successor(), id(0));
    }

    #[test]
    fn test_repair_moves_black_when_white() {
        let mut engine = ProtocolEngine::new(id(0), 4);
        engine.state_mut().set_black(id(1));
        engine.state_mut().merge_crashed([id(1)]);
        engine.repair_successor();
        assert_eq!(engine.state().black(), id(2));

        // A black node stays its own reference point.
        let mut engine = ProtocolEngine::new(id(0), 4);
        engine.state_mut().merge_crashed([id(1)]);
        engine.repair_successor();
        assert_eq!(engine.state().black(), id(0));
    }

    // ==================== crash observation ====================

    #[test]
    fn test_observe_successor_crash_repairs() {
        let mut engine = ProtocolEngine::new(id(1), 4);
        let outcomes = engine.observe_crash(id(2));
        assert!(outcomes.is_empty());
        assert_eq!(engine.state().successor(), id(3));
        assert_eq!(engine.state().report(), &set(&[2]));
    }

    #[test]
    fn test_adjacent_crashes_repair_in_any_notice_order() {
        for order in [[2, 1], [1, 2]] {
            let mut engines = ring(5);
            for crashed in order {
                assert!(engines[0].observe_crash(id(crashed)).is_empty());
            }
            assert_eq!(engines[0].state().successor(), id(3));
            assert_eq!(engines[0].state().report(), &set(&[1, 2]));
        }
    }

    #[test]
    fn test_successors_form_one_cycle_over_alive_nodes() {
        let crashed = [1, 2, 4];
        let alive = set(&[0, 3, 5]);
        let mut engines = ring(6);
        for (offset, i) in alive.iter().enumerate() {
            // Every node hears about the crashes in a different order.
            for k in 0..crashed.len() {
                let notice = crashed[(k + offset) % crashed.len()];
                engines[i.index()].observe_crash(id(notice));
            }
        }

        for start in &alive {
            let walk = successor_walk(&engines, *start);
            assert_eq!(walk.len(), alive.len());
            assert_eq!(walk.iter().copied().collect::<BTreeSet<_>>(), alive);
        }
    }

    #[test]
    fn test_observe_last_other_crash_announces_when_passive() {
        let mut engine = ProtocolEngine::new(id(0), 2);
        assert_eq!(
            engine.observe_crash(id(1)),
            vec![Outcome::AnnounceWhenPassive]
        );
    }

    #[test]
    fn test_observe_crash_of_token_recipient_retransmits() {
        let mut engines = ring(4);
        let (to, _lost) = step(&mut engines[0], Token::bootstrap(id(0), 4));
        assert_eq!(to, id(1));

        let outcomes = engines[0].observe_crash(id(1));
        let last = match outcomes.as_slice() {
            [Outcome::RetransmitWhenPassive(last)] => last.clone(),
            other => panic!("expected retransmit, got {other:?}"),
        };
        assert_eq!(engines[0].state().successor(), id(2));

        let outcome = engines[0].retransmit(last).unwrap();
        let Outcome::Forward { to, token } = outcome else {
            panic!("expected forward");
        };
        assert_eq!(to, id(2));
        assert_eq!(token.sequence(), 1);
        assert_eq!(token.black(), id(0));
        assert_eq!(token.crashed(), &set(&[1]));
        assert_eq!(engines[0].state().crashed(), &set(&[1]));
        assert!(engines[0].state().report().is_empty());
        // Local sequence was already advanced by the original forward.
        assert_eq!(engines[0].state().sequence(), 1);

        // Node 2 accepts the retransmitted token.
        assert!(engines[2].receive(token).is_ok());
    }

    #[test]
    fn test_retransmit_wraps_sequence_when_new_hop_wraps() {
        let mut engines = ring(3);
        // Node 1 forwarded to 2 with sequence 1.
        engines[0].state_mut().advance_sequence();
        let mut token = Token::bootstrap(id(0), 3);
        token.set_sender(id(0));
        let (to, _lost) = step(&mut engines[1], token);
        assert_eq!(to, id(2));

        let outcomes = engines[1].observe_crash(id(2));
        let [Outcome::RetransmitWhenPassive(last)] = outcomes.as_slice() else {
            panic!("expected retransmit");
        };
        let Some(Outcome::Forward { to, token }) = engines[1].retransmit(last.clone()) else {
            panic!("expected forward");
        };
        assert_eq!(to, id(0));
        assert_eq!(token.sequence(), 2);
        assert!(engines[0].receive(token).is_ok());
    }

    #[test]
    fn test_origin_crash_before_forwarding_recovers_bootstrap() {
        let mut engines = ring(4);
        assert!(engines[3].observer().bootstrap().is_some());
        assert!(engines[0].observer().bootstrap().is_none());

        // Everyone but the origin's predecessor just records the crash.
        assert!(engines[1].observe_crash(id(0)).is_empty());
        assert!(engines[2].observe_crash(id(0)).is_empty());

        let outcomes = engines[3].observe_crash(id(0));
        let [Outcome::RetransmitWhenPassive(last)] = outcomes.as_slice() else {
            panic!("expected retransmit, got {outcomes:?}");
        };
        assert_eq!(engines[3].state().successor(), id(1));
        let Some(Outcome::Forward { to, token }) = engines[3].retransmit(last.clone()) else {
            panic!("expected forward");
        };
        assert_eq!(to, id(1));
        assert_eq!(token.sequence(), 1);
        assert_eq!(token.crashed(), &set(&[0]));

        let announcer = pump(&mut engines, token, to, 20);
        assert!(matches!(announcer, Some(n) if n != id(0)));
    }

    #[test]
    fn test_bootstrap_recovered_when_origin_and_predecessor_crash() {
        // The origin's predecessor dies too, before it could resend anything.
        for order in [[4, 0], [0, 4]] {
            let mut engines = ring(5);
            let mut recovered = None;
            for crashed in order {
                for engine in &mut engines[1..4] {
                    for outcome in engine.observe_crash(id(crashed)) {
                        match outcome {
                            Outcome::RetransmitWhenPassive(last) => {
                                assert_eq!(engine.id(), id(3));
                                recovered = Some(last);
                            }
                            other => panic!("unexpected outcome {other:?}"),
                        }
                    }
                }
            }
            let last = recovered.expect("bootstrap recovered");
            assert_eq!(last.destination, id(0));

            let Some(Outcome::Forward { to, token }) = engines[3].retransmit(last) else {
                panic!("expected forward");
            };
            assert_eq!(to, id(1));
            assert_eq!(token.sequence(), 1);

            let announcer = pump(&mut engines, token, to, 20);
            assert!(matches!(announcer, Some(n) if (1..4).contains(&n.index())));
        }
    }

    #[test]
    fn test_recovered_bootstrap_wraps_when_origin_is_last() {
        let origin = id(3);
        let mut engines: Vec<_> = NodeId::all(4)
            .map(|i| {
                let mut engine = ProtocolEngine::with_origin(i, 4, origin);
                engine.state_mut().set_passive();
                engine
            })
            .collect();

        let outcomes = engines[2].observe_crash(origin);
        let [Outcome::RetransmitWhenPassive(last)] = outcomes.as_slice() else {
            panic!("expected retransmit, got {outcomes:?}");
        };
        let Some(Outcome::Forward { to, token }) = engines[2].retransmit(last.clone()) else {
            panic!("expected forward");
        };
        assert_eq!(to, id(0));
        // Node 0 sits below the origin and expects the wrapped sequence.
        assert_eq!(token.sequence(), 2);
        assert!(engines[0].receive(token).is_ok());
    }

    #[test]
    fn test_duplicate_bootstrap_is_dropped_as_stale() {
        let mut engines = ring(4);
        // The origin did forward before crashing, node 1 already accepted it.
        let (to, token) = step(&mut engines[0], Token::bootstrap(id(0), 4));
        step(&mut engines[to.index()], token);

        let outcomes = engines[3].observe_crash(id(0));
        let [Outcome::RetransmitWhenPassive(last)] = outcomes.as_slice() else {
            panic!("expected retransmit, got {outcomes:?}");
        };
        let Some(Outcome::Forward { to, token }) = engines[3].retransmit(last.clone()) else {
            panic!("expected forward");
        };
        assert_eq!(to, id(1));
        assert!(matches!(
            engines[1].receive(token),
            Err(Dropped::StaleSequence { .. })
        ));
    }

    #[test]
    fn test_retransmit_is_skipped_after_newer_forward() {
        let mut engines = ring(3);
        let (_, token) = step(&mut engines[0], Token::bootstrap(id(0), 3));
        let stale = LastToken {
            destination: id(1),
            token,
        };
        // The observer still holds the snapshot from the real forward.
        assert!(engines[0].retransmit(stale).is_none());
    }
}
