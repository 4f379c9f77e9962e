use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::flow::{ChannelState, PacketPassInterface};
use crate::pending::PendingGroup;

struct Recv {
    iface: PacketPassInterface,
    got: Rc<RefCell<Vec<Vec<u8>>>>,
}

fn receiver(mtu: usize, pg: &PendingGroup) -> Recv {
    let got: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
    let g = got.clone();
    let iface = PacketPassInterface::new(mtu, pg, move |data| g.borrow_mut().push(data));
    Recv { iface, got }
}

#[test]
fn send_goes_through_all_four_states() {
    let pg = PendingGroup::new();
    let r = receiver(100, &pg);
    let h = r.iface.handle();
    let done = Rc::new(Cell::new(0));
    let d = done.clone();
    h.sender_init(move || d.set(d.get() + 1));

    assert_eq!(h.state(), ChannelState::Idle);
    h.send(b"hello".to_vec());
    assert_eq!(h.state(), ChannelState::OperationPending);
    // 接收方不会在 send 的调用栈里被调用
    assert!(r.got.borrow().is_empty());

    pg.run();
    assert_eq!(h.state(), ChannelState::Busy);
    assert_eq!(*r.got.borrow(), vec![b"hello".to_vec()]);

    r.iface.done();
    assert_eq!(h.state(), ChannelState::DonePending);
    assert_eq!(done.get(), 0);

    pg.run();
    assert_eq!(h.state(), ChannelState::Idle);
    assert_eq!(done.get(), 1);
    assert_eq!(h.mtu(), 100);
}

#[test]
fn sender_may_send_again_from_done_handler() {
    let pg = PendingGroup::new();
    let r = receiver(10, &pg);
    let h = r.iface.handle();
    let left = Rc::new(Cell::new(2));
    let (l, hs) = (left.clone(), h.clone());
    h.sender_init(move || {
        if l.get() > 0 {
            l.set(l.get() - 1);
            hs.send(vec![l.get() as u8]);
        }
    });

    h.send(vec![9]);
    for _ in 0..3 {
        pg.run();
        r.iface.done();
    }
    pg.run();
    assert_eq!(*r.got.borrow(), vec![vec![9], vec![1], vec![0]]);
    assert_eq!(h.state(), ChannelState::Idle);
}

#[test]
fn receiver_may_complete_inside_its_send_handler() {
    let pg = PendingGroup::new();
    let slot: Rc<RefCell<Option<PacketPassInterface>>> = Rc::new(RefCell::new(None));
    let s = slot.clone();
    let iface = PacketPassInterface::new(10, &pg, move |_| {
        if let Some(i) = s.borrow().as_ref() {
            i.done();
        }
    });
    let h = iface.handle();
    *slot.borrow_mut() = Some(iface);

    let done = Rc::new(Cell::new(false));
    let d = done.clone();
    h.sender_init(move || d.set(true));
    h.send(vec![1, 2, 3]);
    pg.run();
    assert!(done.get());
    assert_eq!(h.state(), ChannelState::Idle);
    slot.borrow_mut().take();
}

#[test]
fn cancel_while_busy_calls_receiver_synchronously() {
    let pg = PendingGroup::new();
    let r = receiver(10, &pg);
    let cancels = Rc::new(Cell::new(0));
    let c = cancels.clone();
    r.iface.enable_cancel(move || c.set(c.get() + 1));
    let h = r.iface.handle();
    let done = Rc::new(Cell::new(0));
    let d = done.clone();
    h.sender_init(move || d.set(d.get() + 1));
    assert!(h.has_cancel());

    h.send(vec![1]);
    pg.run();
    h.cancel();
    assert_eq!(cancels.get(), 1);
    assert_eq!(h.state(), ChannelState::Idle);
    pg.run();
    assert_eq!(done.get(), 0);
}

#[test]
fn cancel_before_delivery_does_not_reach_receiver() {
    let pg = PendingGroup::new();
    let r = receiver(10, &pg);
    let cancels = Rc::new(Cell::new(0));
    let c = cancels.clone();
    r.iface.enable_cancel(move || c.set(c.get() + 1));
    let h = r.iface.handle();
    h.sender_init(|| {});

    h.send(vec![1]);
    h.cancel();
    pg.run();
    assert!(r.got.borrow().is_empty());
    assert_eq!(cancels.get(), 0);

    // 撤销后可以再发
    h.send(vec![2]);
    pg.run();
    assert_eq!(*r.got.borrow(), vec![vec![2]]);
}

#[test]
fn cancel_in_done_pending_suppresses_done() {
    let pg = PendingGroup::new();
    let r = receiver(10, &pg);
    r.iface.enable_cancel(|| {});
    let h = r.iface.handle();
    let done = Rc::new(Cell::new(0));
    let d = done.clone();
    h.sender_init(move || d.set(d.get() + 1));

    h.send(vec![1]);
    pg.run();
    r.iface.done();
    h.cancel();
    pg.run();
    assert_eq!(done.get(), 0);
    assert_eq!(h.state(), ChannelState::Idle);
}

#[test]
fn request_cancel_before_delivery_completes_without_receiver() {
    let pg = PendingGroup::new();
    let r = receiver(10, &pg);
    let asked = Rc::new(Cell::new(0));
    let a = asked.clone();
    r.iface.enable_request_cancel(move || a.set(a.get() + 1));
    let h = r.iface.handle();
    let done = Rc::new(Cell::new(0));
    let d = done.clone();
    h.sender_init(move || d.set(d.get() + 1));

    h.send(vec![1]);
    h.request_cancel();
    assert_eq!(h.state(), ChannelState::DonePending);
    pg.run();
    assert_eq!(done.get(), 1);
    assert!(r.got.borrow().is_empty());
    assert_eq!(asked.get(), 0);
}

#[test]
fn request_cancel_while_busy_asks_receiver_once() {
    let pg = PendingGroup::new();
    let r = receiver(10, &pg);
    let asked = Rc::new(Cell::new(0));
    let a = asked.clone();
    r.iface.enable_request_cancel(move || a.set(a.get() + 1));
    let h = r.iface.handle();
    h.sender_init(|| {});

    h.send(vec![1]);
    pg.run();
    h.request_cancel();
    h.request_cancel();
    pg.run();
    assert_eq!(asked.get(), 1);
    assert_eq!(h.state(), ChannelState::Busy);

    r.iface.done();
    h.request_cancel();
    pg.run();
    assert_eq!(asked.get(), 1);
    assert_eq!(h.state(), ChannelState::Idle);
}

#[test]
fn handle_reports_freed_interface() {
    let pg = PendingGroup::new();
    let r = receiver(10, &pg);
    let h = r.iface.handle();
    h.sender_init(|| {});
    h.send(vec![1]);
    drop(r);
    assert!(h.is_freed());
    // 释放后挂起的 job 被撤掉
    assert!(!pg.has_jobs());
}

#[test]
#[should_panic(expected = "operation started while not idle")]
fn send_while_busy_panics() {
    let pg = PendingGroup::new();
    let r = receiver(10, &pg);
    let h = r.iface.handle();
    h.sender_init(|| {});
    h.send(vec![1]);
    h.send(vec![2]);
}

#[test]
#[should_panic(expected = "exceeds MTU")]
fn send_over_mtu_panics() {
    let pg = PendingGroup::new();
    let r = receiver(4, &pg);
    let h = r.iface.handle();
    h.sender_init(|| {});
    h.send(vec![0; 5]);
}

#[test]
#[should_panic(expected = "done called while not busy")]
fn done_while_idle_panics() {
    let pg = PendingGroup::new();
    let r = receiver(10, &pg);
    r.iface.handle().sender_init(|| {});
    r.iface.done();
}

#[test]
#[should_panic(expected = "cancel not enabled")]
fn cancel_without_support_panics() {
    let pg = PendingGroup::new();
    let r = receiver(10, &pg);
    let h = r.iface.handle();
    h.sender_init(|| {});
    h.send(vec![1]);
    h.cancel();
}

#[test]
#[should_panic(expected = "cancel called while idle")]
fn cancel_while_idle_panics() {
    let pg = PendingGroup::new();
    let r = receiver(10, &pg);
    r.iface.enable_cancel(|| {});
    let h = r.iface.handle();
    h.sender_init(|| {});
    h.cancel();
}

#[test]
#[should_panic(expected = "used after it was freed")]
fn send_on_freed_interface_panics() {
    let pg = PendingGroup::new();
    let r = receiver(10, &pg);
    let h = r.iface.handle();
    drop(r);
    h.send(vec![1]);
}
