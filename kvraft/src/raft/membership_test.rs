use std::collections::BTreeSet;

use anyhow::Result;
use maplit::btreeset;
use memstore::MemStorage;
use pretty_assertions::assert_eq;

use crate::errors::Error;
use crate::message::Entry;
use crate::message::EntryType;
use crate::message::Message;
use crate::message::MessageType;
use crate::raft::testing::elect;
use crate::raft::testing::msg;
use crate::raft::testing::new_test_raft;
use crate::NONE;

fn propose_conf_change(r: &mut crate::raft::Raft<MemStorage>) -> Result<(), Error> {
    r.step(Message {
        msg_type: MessageType::Propose,
        from: 1,
        to: 1,
        entries: vec![Entry {
            entry_type: EntryType::ConfChange,
            data: b"cc".to_vec(),
            ..Default::default()
        }],
        ..Default::default()
    })
}

#[test]
fn test_add_node() -> Result<()> {
    let mut r = new_test_raft(1, vec![1], 10, 1, MemStorage::new());
    elect(&mut r, &[]);
    assert_eq!(1, r.raft_log.last_index());

    r.add_node(2);

    let peers: BTreeSet<u64> = r.prs.keys().copied().collect();
    assert_eq!(btreeset! {1, 2}, peers);
    assert_eq!(2, r.prs[&2].next_idx);
    assert_eq!(0, r.prs[&2].matched);

    // Adding an existing node changes nothing.
    r.add_node(2);
    assert_eq!(2, r.prs.len());

    Ok(())
}

#[test]
fn test_remove_node_may_commit_pending_entries() -> Result<()> {
    let mut r = new_test_raft(1, vec![1, 2, 3, 4, 5], 10, 1, MemStorage::new());
    elect(&mut r, &[2, 3]);
    r.read_messages();

    // The no-op commits on {1, 2, 3}.
    let mut ack = msg(2, 1, 1, MessageType::AppendResponse);
    ack.index = 1;
    r.step(ack)?;
    let mut ack = msg(3, 1, 1, MessageType::AppendResponse);
    ack.index = 1;
    r.step(ack)?;
    assert_eq!(1, r.raft_log.committed);

    // A new entry is acknowledged by node 2 only: two of five.
    r.step(Message {
        msg_type: MessageType::Propose,
        from: 1,
        to: 1,
        entries: vec![Entry::default()],
        ..Default::default()
    })?;
    let mut ack = msg(2, 1, 1, MessageType::AppendResponse);
    ack.index = 2;
    r.step(ack)?;
    assert_eq!(1, r.raft_log.committed);

    // Shrinking the cluster to {1, 2, 3} turns those two acks into a quorum.
    r.remove_node(4);
    assert_eq!(1, r.raft_log.committed);
    r.remove_node(5);
    assert_eq!(2, r.raft_log.committed);

    Ok(())
}

#[test]
fn test_only_one_conf_change_in_flight() -> Result<()> {
    let mut r = new_test_raft(1, vec![1], 10, 1, MemStorage::new());
    elect(&mut r, &[]);
    assert_eq!(1, r.raft_log.last_index());

    propose_conf_change(&mut r)?;
    assert_eq!(2, r.pending_conf_index);
    assert_eq!(Ok(EntryType::ConfChange), r.raft_log.slice(2, 3).map(|e| e[0].entry_type));

    // The first change has not been applied yet; the second one degrades to
    // a no-op entry.
    propose_conf_change(&mut r)?;
    assert_eq!(2, r.pending_conf_index);
    let e = r.raft_log.slice(3, 4)?.remove(0);
    assert_eq!(EntryType::Normal, e.entry_type);
    assert!(e.data.is_empty());

    // Once the change is applied, the gate opens again.
    r.raft_log.applied_to(2);
    propose_conf_change(&mut r)?;
    assert_eq!(4, r.pending_conf_index);

    Ok(())
}

#[test]
fn test_election_gates_unapplied_conf_entries() -> Result<()> {
    // A freshly elected leader does not know whether older entries hold a
    // membership change, so the gate starts at its last index.
    let store = MemStorage::new();
    store.wl().append(&[Entry {
        entry_type: EntryType::ConfChange,
        term: 1,
        index: 1,
        data: b"cc".to_vec(),
    }]);
    let mut r = new_test_raft(1, vec![1, 2, 3], 10, 1, store);
    r.become_follower(1, NONE);
    elect(&mut r, &[2]);

    assert_eq!(1, r.pending_conf_index);

    Ok(())
}

#[test]
fn test_removed_node_cannot_campaign() -> Result<()> {
    let mut r = new_test_raft(1, vec![1, 2], 10, 1, MemStorage::new());
    r.remove_node(1);

    r.step(msg(1, 1, 0, MessageType::Hup))?;

    assert_eq!(crate::raft::StateRole::Follower, r.state);
    assert_eq!(0, r.term);
    assert!(r.read_messages().is_empty());

    Ok(())
}
