//! End-to-end scenarios driven entirely through the public `Endpoint` API over the in-process
//! loopback transport.

use coll_engine::address_set::CollectiveAddress;
use coll_engine::datatype::{RawBuffer, ReduceOp};
use coll_engine::endpoint::{Endpoint, WORLD_GROUP};
use coll_engine::group::GroupId;
use coll_engine::tag::form_tag;
use coll_engine::transport::loopback::{Fabric, LoopbackAv, LoopbackTransport, RecordingCompletionQueue, RecordingEventQueue};
use coll_engine::transport::Event;

type TestEndpoint = Endpoint<LoopbackTransport, LoopbackAv, RecordingEventQueue, RecordingCompletionQueue>;

fn build_ring(n: usize) -> Vec<TestEndpoint> {
    let fabric = Fabric::new(n);
    (0..n as i32)
        .map(|rank| {
            Endpoint::new(
                LoopbackTransport::new(fabric.clone(), rank),
                LoopbackAv { n, my_rank: rank },
                RecordingEventQueue::default(),
                RecordingCompletionQueue::default(),
            )
        })
        .collect()
}

/// Drives every endpoint's loopback transport and progress engine in lockstep until `group` is
/// quiescent everywhere, or `max_ticks` is exceeded (a correctness bug, not a timing fluke, would
/// show up as non-termination here).
fn drive_to_quiescence(endpoints: &[TestEndpoint], group: GroupId, max_ticks: usize) {
    for _ in 0..max_ticks {
        let mut any_completed = false;
        for ep in endpoints {
            for tag in ep.transport().drain_completed() {
                ep.handle_completion(group, tag).expect("handle_completion");
                any_completed = true;
            }
        }
        for ep in endpoints {
            ep.progress().expect("progress");
        }
        if endpoints.iter().all(|ep| ep.is_quiescent(group)) && !any_completed {
            return;
        }
    }
    assert!(
        endpoints.iter().all(|ep| ep.is_quiescent(group)),
        "did not reach quiescence within {max_ticks} ticks"
    );
}

#[test]
fn barrier_on_three_ranks_completes_everywhere() {
    let endpoints = build_ring(3);
    for (i, ep) in endpoints.iter().enumerate() {
        ep.barrier(WORLD_GROUP, 100 + i).expect("barrier");
    }
    drive_to_quiescence(&endpoints, WORLD_GROUP, 64);

    for ep in &endpoints {
        assert!(ep.is_quiescent(WORLD_GROUP));
    }
}

#[test]
fn allreduce_sum_of_one_two_three_four_is_ten_everywhere() {
    let endpoints = build_ring(4);
    let values = [1i32, 2, 3, 4];
    let mut sends: Vec<Box<i32>> = values.iter().map(|v| Box::new(*v)).collect();
    let mut recvs: Vec<Box<i32>> = (0..4).map(|_| Box::new(0i32)).collect();

    for i in 0..4 {
        let send_buf = RawBuffer::from_mut(&mut *sends[i]);
        let recv_buf = RawBuffer::from_mut(&mut *recvs[i]);
        unsafe {
            endpoints[i]
                .allreduce(WORLD_GROUP, send_buf, recv_buf, ReduceOp::Sum, i)
                .expect("allreduce");
        }
    }
    drive_to_quiescence(&endpoints, WORLD_GROUP, 64);

    for (i, recv) in recvs.iter().enumerate() {
        assert_eq!(**recv, 10, "rank {i} did not observe the reduced sum");
    }
}

#[test]
fn join_on_four_ranks_elects_context_id_one_everywhere() {
    let endpoints = build_ring(4);
    let members: Vec<i32> = (0..4).collect();
    let mut new_group_ids = Vec::new();
    for (i, ep) in endpoints.iter().enumerate() {
        new_group_ids.push(
            ep.join(CollectiveAddress::NOT_AVAILABLE, members.clone(), 200 + i)
                .expect("join"),
        );
    }
    drive_to_quiescence(&endpoints, WORLD_GROUP, 64);

    for (i, ep) in endpoints.iter().enumerate() {
        let new_group = new_group_ids[i];
        assert_eq!(ep.context_id(new_group), Some(1));
        assert_eq!(ep.rank_in(new_group), Some(i as i32));
    }
}

#[test]
fn join_on_five_ranks_non_power_of_two_still_elects_a_consistent_id() {
    let endpoints = build_ring(5);
    let members: Vec<i32> = (0..5).collect();
    let mut new_group_ids = Vec::new();
    for (i, ep) in endpoints.iter().enumerate() {
        new_group_ids.push(
            ep.join(CollectiveAddress::NOT_AVAILABLE, members.clone(), 300 + i)
                .expect("join"),
        );
    }
    drive_to_quiescence(&endpoints, WORLD_GROUP, 128);

    let elected: Vec<_> = endpoints
        .iter()
        .zip(&new_group_ids)
        .map(|(ep, g)| ep.context_id(*g))
        .collect();
    assert!(elected.iter().all(|cid| *cid == elected[0]));
    assert_eq!(elected[0], Some(1));
}

#[test]
fn broadcast_from_root_two_delivers_value_to_every_rank() {
    let endpoints = build_ring(4);
    let root = 2;
    let mut bufs: Vec<Box<i64>> = (0..4)
        .map(|rank| Box::new(if rank == root { 42 } else { 0 }))
        .collect();

    for i in 0..4 {
        let buf = RawBuffer::from_mut(&mut *bufs[i]);
        unsafe {
            endpoints[i].broadcast(WORLD_GROUP, root, buf, i).expect("broadcast");
        }
    }
    drive_to_quiescence(&endpoints, WORLD_GROUP, 64);

    for (i, buf) in bufs.iter().enumerate() {
        assert_eq!(**buf, 42, "rank {i} did not receive the broadcast value");
    }
}

#[test]
fn join_completion_posts_exactly_one_event_per_endpoint() {
    let endpoints = build_ring(4);
    let members: Vec<i32> = (0..4).collect();
    for (i, ep) in endpoints.iter().enumerate() {
        ep.join(CollectiveAddress::NOT_AVAILABLE, members.clone(), 400 + i)
            .expect("join");
    }
    drive_to_quiescence(&endpoints, WORLD_GROUP, 64);

    for ep in &endpoints {
        let events = ep.event_queue().events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::JoinComplete { .. }));
    }
}

#[test]
fn tag_matches_the_literal_encoding_example_end_to_end() {
    assert_eq!(form_tag(0x0123, 0x4567, 0x0000_0089), 0x8000_0089_0123_4567);
}
