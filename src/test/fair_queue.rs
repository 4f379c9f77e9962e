use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::support::{PacedSink, Producer, drain_tags};
use crate::error::FlowError;
use crate::pending::PendingGroup;
use crate::queue::{FairQueueConfig, PacketPassFairQueue, PacketPassFairQueueFlow};

const MTU: usize = 1500;

fn fair_queue(pg: &PendingGroup, sink: &PacedSink) -> PacketPassFairQueue {
    PacketPassFairQueue::new(sink.handle(), pg, FairQueueConfig::default()).expect("fair queue")
}

fn max_consecutive(tags: &[u8], tag: u8) -> usize {
    let mut best = 0;
    let mut run = 0;
    for &t in tags {
        run = if t == tag { run + 1 } else { 0 };
        best = best.max(run);
    }
    best
}

#[test]
fn equal_flows_alternate() {
    let pg = PendingGroup::new();
    let sink = PacedSink::new(MTU, &pg);
    let q = fair_queue(&pg, &sink);
    let fa = PacketPassFairQueueFlow::new(&q);
    let fb = PacketPassFairQueueFlow::new(&q);
    let a = Producer::tagged(fa.input(), 1, 100, 10);
    let b = Producer::tagged(fb.input(), 2, 100, 10);
    a.start();
    b.start();

    let tags = drain_tags(&pg, &sink, 100);
    assert_eq!(tags.len(), 20);
    for pair in tags.chunks(2) {
        assert_ne!(pair[0], pair[1], "flows should alternate: {tags:?}");
    }
    assert_eq!(a.done_count(), 10);
    assert_eq!(b.done_count(), 10);
}

#[test]
fn bytes_are_shared_not_packets() {
    let pg = PendingGroup::new();
    let sink = PacedSink::new(MTU, &pg);
    let q = fair_queue(&pg, &sink);
    let fa = PacketPassFairQueueFlow::new(&q);
    let fb = PacketPassFairQueueFlow::new(&q);
    let a = Producer::tagged(fa.input(), 1, 200, 20);
    let b = Producer::tagged(fb.input(), 2, 50, 80);
    a.start();
    b.start();

    let mut cost = [0u64; 2];
    for _ in 0..40 {
        pg.run();
        let pkt = sink.finish();
        cost[usize::from(pkt[0] - 1)] += pkt.len() as u64 + 1;
        // 差距不超过一个最大包的代价
        assert!(cost[0].abs_diff(cost[1]) <= 201, "cost drifted: {cost:?}");
    }
    assert!(a.done_count() < b.done_count());
    q.prepare_free();
}

#[test]
fn exactly_one_flow_busy_while_output_holds_a_packet() {
    let pg = PendingGroup::new();
    let sink = PacedSink::new(MTU, &pg);
    let q = fair_queue(&pg, &sink);
    let flows: Vec<_> = (0..3).map(|_| PacketPassFairQueueFlow::new(&q)).collect();
    let producers: Vec<_> = flows
        .iter()
        .enumerate()
        .map(|(i, f)| Producer::tagged(f.input(), i as u8, 10, 4))
        .collect();
    for p in &producers {
        p.start();
    }

    for _ in 0..12 {
        pg.run();
        let pkt = sink.holding().expect("output busy");
        let busy: Vec<_> = flows.iter().map(|f| f.is_busy()).collect();
        assert_eq!(busy.iter().filter(|b| **b).count(), 1);
        assert!(busy[usize::from(pkt[0])]);
        sink.finish();
    }
    pg.run();
    assert!(flows.iter().all(|f| !f.is_busy()));
}

#[test]
fn virtual_time_never_decreases() {
    let pg = PendingGroup::new();
    let sink = PacedSink::new(MTU, &pg);
    let q = fair_queue(&pg, &sink);
    let flows: Vec<_> = (0..3).map(|_| PacketPassFairQueueFlow::new(&q)).collect();
    let producers: Vec<_> = flows
        .iter()
        .enumerate()
        .map(|(i, f)| Producer::tagged(f.input(), i as u8, 30 * (i + 1), 6))
        .collect();
    for p in &producers {
        p.start();
    }

    let mut last: Vec<u64> = flows.iter().map(|f| f.virtual_time()).collect();
    for _ in 0..18 {
        pg.run();
        sink.finish();
        pg.run();
        for (f, prev) in flows.iter().zip(last.iter_mut()) {
            let now = f.virtual_time();
            assert!(now >= *prev);
            *prev = now;
        }
    }
}

#[test]
fn late_joiner_gets_no_backlog_credit() {
    let pg = PendingGroup::new();
    let sink = PacedSink::new(MTU, &pg);
    let q = fair_queue(&pg, &sink);
    let fa = PacketPassFairQueueFlow::new(&q);
    let fb = PacketPassFairQueueFlow::new(&q);
    let a = Producer::tagged(fa.input(), 1, 100, 20);
    let b = Producer::tagged(fb.input(), 2, 100, 5);

    a.start();
    let mut tags = Vec::new();
    for _ in 0..5 {
        pg.run();
        tags.push(sink.finish()[0]);
    }
    assert_eq!(tags, vec![1; 5]);

    b.start();
    tags.extend(drain_tags(&pg, &sink, 100));
    assert_eq!(max_consecutive(&tags, 2), 1, "{tags:?}");
    assert_eq!(b.done_count(), 5);
    assert_eq!(a.done_count(), 20);
}

#[test]
fn idle_flow_rejoins_at_current_time() {
    let pg = PendingGroup::new();
    let sink = PacedSink::new(MTU, &pg);
    let q = fair_queue(&pg, &sink);
    let fa = PacketPassFairQueueFlow::new(&q);
    let fb = PacketPassFairQueueFlow::new(&q);
    let ia = fa.input();
    ia.sender_init(|| {});
    let b = Producer::tagged(fb.input(), 2, 100, 10);
    ia.send(vec![1; 100]);
    b.start();

    let mut tags = Vec::new();
    for _ in 0..7 {
        pg.run();
        tags.push(sink.finish()[0]);
    }
    pg.run();
    assert_eq!(tags, vec![2, 1, 2, 2, 2, 2, 2]);
    assert_eq!(fa.virtual_time(), 101);
    assert!(fb.is_busy());

    // A 空闲期间 B 一直在发，A 再次发送时被拉到当前时间
    ia.send(vec![1; 100]);
    pg.run();
    assert_eq!(fa.virtual_time(), 606);
    sink.finish();
    pg.run();
    assert!(fa.is_busy());

    let rest = drain_tags(&pg, &sink, 100);
    assert_eq!(rest, vec![1, 2, 2, 2]);
    assert_eq!(b.done_count(), 10);
}

#[test]
fn overflow_rebases_every_flow() {
    let pg = PendingGroup::new();
    let sink = PacedSink::new(MTU, &pg);
    let q = fair_queue(&pg, &sink);
    let fa = PacketPassFairQueueFlow::new(&q);
    let fb = PacketPassFairQueueFlow::new(&q);
    let fc = PacketPassFairQueueFlow::new(&q);
    let fd = PacketPassFairQueueFlow::new(&q);
    let a = Producer::tagged(fa.input(), 1, 99, 1);
    let b = Producer::tagged(fb.input(), 2, 99, 1);

    a.start();
    pg.run();
    assert!(fa.is_busy());
    b.start();
    pg.run();

    let max = u64::MAX;
    fa.set_virtual_time(max - 50);
    fb.set_virtual_time(max - 10);
    fc.set_virtual_time(10);
    fd.set_virtual_time(max - 5);

    // 代价 100 > max - (max - 50)，触发平移；最小值为排队中的 B
    sink.finish();
    pg.run();

    assert_eq!(fa.virtual_time(), 60);
    assert_eq!(fb.virtual_time(), 0);
    assert_eq!(fc.virtual_time(), 0);
    assert_eq!(fd.virtual_time(), 5);
    assert!(fb.is_busy());
    assert_eq!(sink.holding().map(|p| p[0]), Some(2));

    sink.finish();
    pg.run();
    assert_eq!(a.done_count(), 1);
    assert_eq!(b.done_count(), 1);
}

#[test]
fn overflow_with_empty_heap_uses_own_time() {
    let pg = PendingGroup::new();
    let sink = PacedSink::new(MTU, &pg);
    let q = fair_queue(&pg, &sink);
    let fa = PacketPassFairQueueFlow::new(&q);
    let fc = PacketPassFairQueueFlow::new(&q);
    let a = Producer::tagged(fa.input(), 1, 99, 1);

    a.start();
    pg.run();
    fa.set_virtual_time(u64::MAX - 20);
    fc.set_virtual_time(u64::MAX - 30);
    sink.finish();
    pg.run();

    assert_eq!(fa.virtual_time(), 100);
    assert_eq!(fc.virtual_time(), 0);
}

#[test]
fn release_cancels_output_and_suppresses_done() {
    let pg = PendingGroup::new();
    let sink = PacedSink::with_cancel(MTU, &pg);
    let q = fair_queue(&pg, &sink);
    q.enable_cancel();
    let fa = PacketPassFairQueueFlow::new(&q);
    let fb = PacketPassFairQueueFlow::new(&q);
    let a = Producer::tagged(fa.input(), 1, 10, 3);
    let b = Producer::tagged(fb.input(), 2, 10, 3);
    b.start();
    a.start();
    pg.run();
    assert!(fa.is_busy());

    fa.release();
    assert_eq!(sink.cancelled(), 1);
    assert!(!fa.is_busy());
    drop(fa);
    assert_eq!(q.flow_count(), 1);

    let tags = drain_tags(&pg, &sink, 10);
    assert_eq!(tags, vec![2, 2, 2]);
    assert_eq!(a.done_count(), 0);
    assert_eq!(b.done_count(), 3);
}

#[test]
fn busy_handler_can_free_its_flow() {
    let pg = PendingGroup::new();
    let sink = PacedSink::new(MTU, &pg);
    let q = fair_queue(&pg, &sink);
    let fa = Rc::new(RefCell::new(Some(PacketPassFairQueueFlow::new(&q))));
    let fb = PacketPassFairQueueFlow::new(&q);
    let a = Producer::tagged(fa.borrow().as_ref().expect("flow").input(), 1, 10, 2);
    let b = Producer::tagged(fb.input(), 2, 10, 2);
    b.start();
    a.start();
    pg.run();

    {
        let guard = fa.borrow();
        let flow = guard.as_ref().expect("flow");
        assert!(flow.is_busy());
        let slot = fa.clone();
        flow.set_busy_handler(move || {
            slot.borrow_mut().take();
        });
    }
    sink.finish();
    pg.run();

    assert!(fa.borrow().is_none());
    assert_eq!(q.flow_count(), 1);
    // 流在自己的 done 送达之前就被释放了
    assert_eq!(a.done_count(), 0);

    let tags = drain_tags(&pg, &sink, 10);
    assert_eq!(tags, vec![2, 2]);
}

#[test]
fn teardown_frees_busy_flows() {
    let pg = PendingGroup::new();
    let sink = PacedSink::new(MTU, &pg);
    let q = fair_queue(&pg, &sink);
    let fa = PacketPassFairQueueFlow::new(&q);
    let fb = PacketPassFairQueueFlow::new(&q);
    let a = Producer::tagged(fa.input(), 1, 10, 5);
    let b = Producer::tagged(fb.input(), 2, 10, 5);
    a.start();
    b.start();
    pg.run();
    assert!(sink.holding().is_some());

    q.prepare_free();
    assert!(q.is_freeing());
    drop(fa);
    drop(fb);
    drop(q);
    pg.run();
    assert_eq!(a.done_count() + b.done_count(), 0);
}

#[test]
#[should_panic(expected = "busy flow freed outside of teardown")]
fn freeing_busy_flow_without_teardown_panics() {
    let pg = PendingGroup::new();
    let sink = PacedSink::new(MTU, &pg);
    let q = fair_queue(&pg, &sink);
    let fa = PacketPassFairQueueFlow::new(&q);
    let a = Producer::tagged(fa.input(), 1, 10, 1);
    a.start();
    pg.run();
    drop(fa);
}

#[test]
#[should_panic(expected = "cancel not enabled")]
fn release_without_cancel_panics() {
    let pg = PendingGroup::new();
    let sink = PacedSink::new(MTU, &pg);
    let q = fair_queue(&pg, &sink);
    let fa = PacketPassFairQueueFlow::new(&q);
    let a = Producer::tagged(fa.input(), 1, 10, 1);
    a.start();
    pg.run();
    fa.release();
}

#[test]
fn weight_that_overflows_is_rejected() {
    let pg = PendingGroup::new();
    let sink = PacedSink::new(100, &pg);
    let err = PacketPassFairQueue::new(
        sink.handle(),
        &pg,
        FairQueueConfig {
            packet_weight: u64::MAX - 10,
        },
    )
    .err()
    .expect("weight must be rejected");
    assert_eq!(
        err,
        FlowError::WeightOverflow {
            weight: u64::MAX - 10,
            mtu: 100
        }
    );
}

#[test]
fn request_cancel_finishes_through_normal_done() {
    let pg = PendingGroup::new();
    let sink = PacedSink::new(MTU, &pg);
    let asked = Rc::new(Cell::new(0));
    let c = asked.clone();
    sink.iface.enable_request_cancel(move || c.set(c.get() + 1));
    let q = fair_queue(&pg, &sink);
    let fa = PacketPassFairQueueFlow::new(&q);
    let a = Producer::tagged(fa.input(), 1, 10, 2);
    a.start();
    pg.run();

    fa.request_cancel();
    pg.run();
    assert_eq!(asked.get(), 1);
    assert!(fa.is_busy());

    // 接收方提前结束，虚拟时间照常推进
    sink.finish();
    pg.run();
    assert_eq!(a.done_count(), 1);
    assert_eq!(fa.virtual_time(), 11);
    assert_eq!(drain_tags(&pg, &sink, 10), vec![1]);
}
