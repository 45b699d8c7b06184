use anyhow::Result;
use memstore::MemStorage;
use pretty_assertions::assert_eq;

use crate::message::Message;
use crate::message::MessageType;
use crate::raft::testing::elect;
use crate::raft::testing::ent;
use crate::raft::testing::msg;
use crate::raft::testing::new_test_raft;
use crate::raft::StateRole;
use crate::NONE;

#[test]
fn test_follower_campaigns_after_election_timeout() -> Result<()> {
    let mut r = new_test_raft(1, vec![1, 2, 3], 10, 1, MemStorage::new());

    for _ in 0..11 {
        r.tick();
    }

    assert_eq!(StateRole::Candidate, r.state);
    assert_eq!(1, r.term);
    assert_eq!(1, r.vote);
    assert!(r.votes.granted(1));

    let msgs = r.read_messages();
    let mut to: Vec<u64> = msgs.iter().map(|m| m.to).collect();
    to.sort_unstable();
    assert_eq!(vec![2, 3], to);
    for m in &msgs {
        assert_eq!(MessageType::RequestVote, m.msg_type);
        assert_eq!(1, m.from);
        assert_eq!(1, m.term);
    }

    Ok(())
}

#[test]
fn test_tick_before_timeout_does_not_campaign() -> Result<()> {
    let mut r = new_test_raft(1, vec![1, 2, 3], 10, 1, MemStorage::new());

    for _ in 0..9 {
        r.tick();
    }

    assert_eq!(StateRole::Follower, r.state);
    assert_eq!(0, r.term);
    assert!(r.read_messages().is_empty());

    Ok(())
}

#[test]
fn test_split_vote_both_candidates_stay() -> Result<()> {
    let mut r1 = new_test_raft(1, vec![1, 2], 10, 1, MemStorage::new());
    let mut r2 = new_test_raft(2, vec![1, 2], 10, 1, MemStorage::new());

    r1.step(msg(1, 1, 0, MessageType::Hup))?;
    r2.step(msg(2, 2, 0, MessageType::Hup))?;
    let req1 = r1.read_messages().remove(0);
    let req2 = r2.read_messages().remove(0);

    // Each candidate already voted for itself; the cross requests are denied.
    r1.step(req2)?;
    r2.step(req1)?;

    let resp1 = r1.read_messages().remove(0);
    let resp2 = r2.read_messages().remove(0);
    assert!(resp1.reject);
    assert!(resp2.reject);

    r1.step(resp2)?;
    r2.step(resp1)?;

    assert_eq!(StateRole::Candidate, r1.state);
    assert_eq!(StateRole::Candidate, r2.state);

    Ok(())
}

#[test]
fn test_candidate_wins_with_quorum() -> Result<()> {
    let mut r = new_test_raft(1, vec![1, 2, 3, 4, 5], 10, 1, MemStorage::new());
    r.become_follower(4, NONE);

    r.step(msg(1, 1, 0, MessageType::Hup))?;
    assert_eq!(StateRole::Candidate, r.state);
    assert_eq!(5, r.term);
    r.read_messages();

    r.step(msg(2, 1, 5, MessageType::RequestVoteResponse))?;
    assert_eq!(StateRole::Candidate, r.state);

    r.step(msg(3, 1, 5, MessageType::RequestVoteResponse))?;
    assert_eq!(StateRole::Leader, r.state);
    assert_eq!(1, r.lead);

    // Every cursor restarts at the old last index + 1; the no-op of the new
    // term sits right there.
    for (id, pr) in &r.prs {
        if *id == 1 {
            assert_eq!(1, pr.matched);
        } else {
            assert_eq!(1, pr.next_idx);
        }
    }

    let msgs = r.read_messages();
    let appends: Vec<_> = msgs.iter().filter(|m| m.msg_type == MessageType::Append).collect();
    assert_eq!(4, appends.len());
    for m in appends {
        assert_eq!(5, m.term);
        assert_eq!(0, m.index);
        assert_eq!(vec![ent(1, 5)], m.entries);
    }

    Ok(())
}

#[test]
fn test_candidate_steps_down_when_quorum_denies() -> Result<()> {
    let mut r = new_test_raft(1, vec![1, 2, 3], 10, 1, MemStorage::new());

    r.step(msg(1, 1, 0, MessageType::Hup))?;
    r.read_messages();

    let mut denial = msg(2, 1, 1, MessageType::RequestVoteResponse);
    denial.reject = true;
    r.step(denial)?;
    assert_eq!(StateRole::Candidate, r.state);

    let mut denial = msg(3, 1, 1, MessageType::RequestVoteResponse);
    denial.reject = true;
    r.step(denial)?;

    assert_eq!(StateRole::Follower, r.state);
    assert_eq!(1, r.term);
    assert_eq!(NONE, r.lead);

    Ok(())
}

#[test]
fn test_leader_steps_down_on_higher_term_heartbeat() -> Result<()> {
    let mut r = new_test_raft(1, vec![1, 2, 7], 10, 1, MemStorage::new());
    r.become_follower(2, NONE);
    elect(&mut r, &[2]);
    assert_eq!(StateRole::Leader, r.state);
    assert_eq!(3, r.term);

    r.step(msg(7, 1, 5, MessageType::Heartbeat))?;

    assert_eq!(StateRole::Follower, r.state);
    assert_eq!(5, r.term);
    assert_eq!(7, r.lead);
    assert_eq!(NONE, r.vote);
    assert_eq!(0, r.election_elapsed);

    Ok(())
}

#[test]
fn test_vote_request_dropped_within_leader_lease() -> Result<()> {
    let mut r = new_test_raft(1, vec![1, 4, 9], 10, 1, MemStorage::new());
    r.become_follower(2, 4);

    let mut req = msg(9, 1, 3, MessageType::RequestVote);
    req.index = 10;
    req.log_term = 2;
    r.step(req)?;

    // Silently dropped: no reply, no term change.
    assert_eq!(StateRole::Follower, r.state);
    assert_eq!(2, r.term);
    assert_eq!(4, r.lead);
    assert!(r.read_messages().is_empty());

    Ok(())
}

#[test]
fn test_vote_request_handled_once_lease_expires() -> Result<()> {
    let mut r = new_test_raft(1, vec![1, 4, 9], 10, 1, MemStorage::new());
    r.become_follower(2, 4);
    r.election_elapsed = 10;

    let mut req = msg(9, 1, 3, MessageType::RequestVote);
    req.index = 10;
    req.log_term = 2;
    r.step(req)?;

    assert_eq!(3, r.term);
    assert_eq!(9, r.vote);
    let resp = r.read_messages().remove(0);
    assert_eq!(MessageType::RequestVoteResponse, resp.msg_type);
    assert!(!resp.reject);
    assert_eq!(3, resp.term);

    Ok(())
}

#[test]
fn test_vote_denied_to_stale_log() -> Result<()> {
    let store = MemStorage::new();
    store.wl().append(&[ent(1, 1), ent(2, 2)]);
    let mut r = new_test_raft(1, vec![1, 2, 3], 10, 1, store);

    // Candidate 2's log ends at (1, term 1): older than ours.
    let mut req = msg(2, 1, 3, MessageType::RequestVote);
    req.index = 1;
    req.log_term = 1;
    r.step(req)?;

    assert_eq!(3, r.term);
    assert_eq!(NONE, r.vote);
    let resp = r.read_messages().remove(0);
    assert!(resp.reject);
    assert_eq!(3, resp.term);

    // Candidate 3 is as up-to-date as we are: granted.
    let mut req = msg(3, 1, 3, MessageType::RequestVote);
    req.index = 2;
    req.log_term = 2;
    r.step(req)?;

    assert_eq!(3, r.vote);
    let resp = r.read_messages().remove(0);
    assert!(!resp.reject);

    // Same term, different candidate: the vote is already spent.
    let mut req = msg(2, 1, 3, MessageType::RequestVote);
    req.index = 99;
    req.log_term = 99;
    r.step(req)?;

    let resp = r.read_messages().remove(0);
    assert!(resp.reject);
    assert_eq!(3, r.vote);

    Ok(())
}

#[test]
fn test_hup_ignored_by_leader() -> Result<()> {
    let mut r = new_test_raft(1, vec![1, 2], 10, 1, MemStorage::new());
    elect(&mut r, &[2]);
    assert_eq!(StateRole::Leader, r.state);
    let term = r.term;

    r.step(msg(1, 1, 0, MessageType::Hup))?;

    assert_eq!(StateRole::Leader, r.state);
    assert_eq!(term, r.term);

    Ok(())
}

#[test]
fn test_lower_term_message_is_ignored() -> Result<()> {
    let mut r = new_test_raft(1, vec![1, 2], 10, 1, MemStorage::new());
    r.become_follower(5, 2);

    r.step(msg(2, 1, 3, MessageType::Heartbeat))?;

    assert_eq!(5, r.term);
    assert!(r.read_messages().is_empty());

    Ok(())
}

#[test]
fn test_single_node_campaign_wins_immediately() -> Result<()> {
    let mut r = new_test_raft(1, vec![1], 10, 1, MemStorage::new());

    r.step(msg(1, 1, 0, MessageType::Hup))?;

    assert_eq!(StateRole::Leader, r.state);
    assert_eq!(1, r.term);
    // The no-op of the new term commits on the spot.
    assert_eq!(1, r.raft_log.committed);

    Ok(())
}

#[test]
fn test_three_node_cluster_elects_a_single_leader() -> Result<()> {
    let mut nodes: Vec<crate::raft::Raft<MemStorage>> = (1..=3)
        .map(|id| new_test_raft(id, vec![1, 2, 3], 10, 1, MemStorage::new()))
        .collect();

    nodes[0].step(msg(1, 1, 0, MessageType::Hup))?;

    // Route messages until the cluster quiesces.
    loop {
        let queue: Vec<Message> = nodes.iter_mut().flat_map(|n| n.read_messages()).collect();
        if queue.is_empty() {
            break;
        }
        for m in queue {
            let to = (m.to - 1) as usize;
            nodes[to].step(m)?;
        }
    }

    let leaders: Vec<u64> = nodes
        .iter()
        .filter(|n| n.state == StateRole::Leader)
        .map(|n| n.id)
        .collect();
    assert_eq!(vec![1], leaders);

    for n in &nodes {
        assert_eq!(1, n.term);
        assert_eq!(1, n.lead);
        // The winner's no-op reached everyone and committed.
        assert_eq!(1, n.raft_log.committed);
    }

    Ok(())
}

#[test]
fn test_candidate_steps_down_on_same_term_append() -> Result<()> {
    let mut r = new_test_raft(1, vec![1, 2, 3], 10, 1, MemStorage::new());
    r.step(msg(1, 1, 0, MessageType::Hup))?;
    r.read_messages();
    assert_eq!(StateRole::Candidate, r.state);

    // Another node won term 1 and is already replicating.
    let m = Message {
        msg_type: MessageType::Append,
        from: 2,
        to: 1,
        term: 1,
        ..Default::default()
    };
    r.step(m)?;

    assert_eq!(StateRole::Follower, r.state);
    assert_eq!(2, r.lead);
    assert_eq!(1, r.term);

    Ok(())
}
