//! Flow 接口共用的通道状态机
//!
//! `Idle -> OperationPending -> Busy -> DonePending -> Idle`。
//! 发起方（user）提交请求，job 触发后交给提供方（provider）；提供方完成后
//! 再经 job 通知发起方。两个方向的回调都不会在调用者的栈内同步执行，
//! 只有 cancel 会同步调用提供方的 cancel 处理函数。

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::pending::{Job, PendingGroup};
use tracing::trace;

/// 通道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    OperationPending,
    Busy,
    DonePending,
}

type OperationHandler<Req> = Box<dyn FnMut(Req)>;
type DoneHandler<Resp> = Box<dyn FnMut(Resp)>;
type CancelHandler = Box<dyn FnMut()>;

pub(crate) struct Inner<Req: 'static, Resp: 'static> {
    kind: &'static str,
    mtu: Option<usize>,
    state: Cell<ChannelState>,
    freed: Cell<bool>,
    request: RefCell<Option<Req>>,
    response: RefCell<Option<Resp>>,
    handler_operation: RefCell<OperationHandler<Req>>,
    handler_cancel: RefCell<Option<CancelHandler>>,
    handler_request_cancel: RefCell<Option<CancelHandler>>,
    handler_done: RefCell<Option<DoneHandler<Resp>>>,
    has_sender: Cell<bool>,
    has_cancel: Cell<bool>,
    has_request_cancel: Cell<bool>,
    job_operation: Job,
    job_done: Job,
    job_request_cancel: Job,
    in_operation: Cell<bool>,
    in_cancel: Cell<bool>,
    in_done: Cell<bool>,
}

/// 通道本体，由提供方持有；drop 即释放接口。
pub(crate) struct Channel<Req: 'static, Resp: 'static> {
    inner: Rc<Inner<Req, Resp>>,
}

/// 通道的弱引用句柄，可自由克隆。接口释放后再使用会 panic。
pub(crate) struct ChannelRef<Req: 'static, Resp: 'static> {
    inner: Weak<Inner<Req, Resp>>,
}

impl<Req, Resp> Clone for ChannelRef<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Req: 'static, Resp: 'static> Channel<Req, Resp> {
    pub(crate) fn new(
        kind: &'static str,
        mtu: Option<usize>,
        pg: &PendingGroup,
        handler_operation: impl FnMut(Req) + 'static,
    ) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<Inner<Req, Resp>>| {
            let w_op = weak.clone();
            let w_done = weak.clone();
            let w_rc = weak.clone();
            Inner {
                kind,
                mtu,
                state: Cell::new(ChannelState::Idle),
                freed: Cell::new(false),
                request: RefCell::new(None),
                response: RefCell::new(None),
                handler_operation: RefCell::new(Box::new(handler_operation)),
                handler_cancel: RefCell::new(None),
                handler_request_cancel: RefCell::new(None),
                handler_done: RefCell::new(None),
                has_sender: Cell::new(false),
                has_cancel: Cell::new(false),
                has_request_cancel: Cell::new(false),
                job_operation: Job::new(pg, move || {
                    if let Some(i) = w_op.upgrade() {
                        i.job_operation_handler();
                    }
                }),
                job_done: Job::new(pg, move || {
                    if let Some(i) = w_done.upgrade() {
                        i.job_done_handler();
                    }
                }),
                job_request_cancel: Job::new(pg, move || {
                    if let Some(i) = w_rc.upgrade() {
                        i.job_request_cancel_handler();
                    }
                }),
                in_operation: Cell::new(false),
                in_cancel: Cell::new(false),
                in_done: Cell::new(false),
            }
        });
        Self { inner }
    }

    pub(crate) fn handle(&self) -> ChannelRef<Req, Resp> {
        ChannelRef {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub(crate) fn inner(&self) -> &Inner<Req, Resp> {
        &self.inner
    }
}

impl<Req, Resp> Drop for Channel<Req, Resp> {
    fn drop(&mut self) {
        let i = &self.inner;
        i.freed.set(true);
        i.job_operation.unset();
        i.job_done.unset();
        i.job_request_cancel.unset();
    }
}

impl<Req: 'static, Resp: 'static> ChannelRef<Req, Resp> {
    /// 不指向任何接口的句柄
    pub(crate) fn dangling() -> Self {
        Self { inner: Weak::new() }
    }

    /// 取得接口；已释放则 panic
    pub(crate) fn get(&self) -> Rc<Inner<Req, Resp>> {
        match self.inner.upgrade() {
            Some(i) if !i.freed.get() => i,
            _ => panic!("flow interface used after it was freed"),
        }
    }

    pub(crate) fn is_freed(&self) -> bool {
        self.inner.upgrade().is_none_or(|i| i.freed.get())
    }
}

impl<Req: 'static, Resp: 'static> Inner<Req, Resp> {
    pub(crate) fn mtu(&self) -> Option<usize> {
        self.mtu
    }

    pub(crate) fn state(&self) -> ChannelState {
        self.state.get()
    }

    pub(crate) fn has_cancel(&self) -> bool {
        self.has_cancel.get()
    }

    pub(crate) fn has_request_cancel(&self) -> bool {
        self.has_request_cancel.get()
    }

    pub(crate) fn has_sender(&self) -> bool {
        self.has_sender.get()
    }

    /// 注册 cancel 处理函数；只能在发起方接入之前调用一次
    pub(crate) fn enable_cancel(&self, handler: impl FnMut() + 'static) {
        assert!(!self.has_cancel(), "{}: cancel already enabled", self.kind);
        assert!(
            !self.has_sender.get(),
            "{}: cancel must be enabled before the sender attaches",
            self.kind
        );
        *self.handler_cancel.borrow_mut() = Some(Box::new(handler));
        self.has_cancel.set(true);
    }

    pub(crate) fn enable_request_cancel(&self, handler: impl FnMut() + 'static) {
        assert!(
            !self.has_request_cancel(),
            "{}: request-cancel already enabled",
            self.kind
        );
        assert!(
            !self.has_sender.get(),
            "{}: request-cancel must be enabled before the sender attaches",
            self.kind
        );
        *self.handler_request_cancel.borrow_mut() = Some(Box::new(handler));
        self.has_request_cancel.set(true);
    }

    /// 发起方接入；只能调用一次
    pub(crate) fn sender_init(&self, handler: impl FnMut(Resp) + 'static) {
        assert!(!self.has_sender.get(), "{}: sender already attached", self.kind);
        *self.handler_done.borrow_mut() = Some(Box::new(handler));
        self.has_sender.set(true);
    }

    /// 发起方提交请求
    pub(crate) fn start(&self, req: Req) {
        assert_eq!(
            self.state.get(),
            ChannelState::Idle,
            "{}: operation started while not idle",
            self.kind
        );
        assert!(
            self.has_sender.get(),
            "{}: operation started without a sender",
            self.kind
        );
        debug_assert!(!self.in_operation.get());
        debug_assert!(!self.in_cancel.get());

        *self.request.borrow_mut() = Some(req);
        self.state.set(ChannelState::OperationPending);
        self.job_operation.set();
    }

    /// 提供方完成当前操作
    pub(crate) fn done(&self, resp: Resp) {
        assert_eq!(
            self.state.get(),
            ChannelState::Busy,
            "{}: done called while not busy",
            self.kind
        );
        debug_assert!(!self.job_operation.is_set());
        debug_assert!(!self.in_cancel.get());
        debug_assert!(!self.in_done.get());

        *self.response.borrow_mut() = Some(resp);
        self.state.set(ChannelState::DonePending);
        self.job_done.set();
    }

    /// 发起方撤销当前操作
    pub(crate) fn cancel(&self) {
        assert_ne!(
            self.state.get(),
            ChannelState::Idle,
            "{}: cancel called while idle",
            self.kind
        );
        assert!(self.has_cancel(), "{}: cancel not enabled", self.kind);
        debug_assert!(!self.in_operation.get());
        debug_assert!(!self.in_cancel.get());

        let was_busy = self.state.get() == ChannelState::Busy;
        self.job_operation.unset();
        self.job_done.unset();
        self.job_request_cancel.unset();
        self.request.borrow_mut().take();
        self.response.borrow_mut().take();
        self.state.set(ChannelState::Idle);
        trace!(kind = self.kind, was_busy, "操作已撤销");

        // 只有提供方已经拿到请求时才需要通知它
        if was_busy {
            self.in_cancel.set(true);
            if let Some(h) = self.handler_cancel.borrow_mut().as_mut() {
                h();
            }
            self.in_cancel.set(false);
        }
    }

    /// 发起方请求提前结束当前操作。
    ///
    /// 请求尚未交给提供方时直接转为完成（`abort` 把请求变成响应）；
    /// 提供方已在处理时调度其 request-cancel 处理函数；已完成时无操作。
    pub(crate) fn request_cancel(&self, abort: impl FnOnce(Req) -> Resp) {
        assert_ne!(
            self.state.get(),
            ChannelState::Idle,
            "{}: request_cancel called while idle",
            self.kind
        );
        assert!(
            self.has_request_cancel(),
            "{}: request-cancel not enabled",
            self.kind
        );

        match self.state.get() {
            ChannelState::OperationPending => {
                self.job_operation.unset();
                let req = self
                    .request
                    .borrow_mut()
                    .take()
                    .expect("pending operation has a request");
                *self.response.borrow_mut() = Some(abort(req));
                self.state.set(ChannelState::DonePending);
                self.job_done.set();
            }
            ChannelState::Busy => {
                if !self.job_request_cancel.is_set() {
                    self.job_request_cancel.set();
                }
            }
            ChannelState::DonePending | ChannelState::Idle => {}
        }
    }

    fn job_operation_handler(&self) {
        debug_assert_eq!(self.state.get(), ChannelState::OperationPending);
        let req = self
            .request
            .borrow_mut()
            .take()
            .expect("pending operation has a request");
        self.state.set(ChannelState::Busy);

        self.in_operation.set(true);
        (self.handler_operation.borrow_mut())(req);
        self.in_operation.set(false);
    }

    fn job_done_handler(&self) {
        debug_assert_eq!(self.state.get(), ChannelState::DonePending);
        let resp = self
            .response
            .borrow_mut()
            .take()
            .expect("finished operation has a response");
        self.state.set(ChannelState::Idle);

        self.in_done.set(true);
        if let Some(h) = self.handler_done.borrow_mut().as_mut() {
            h(resp);
        }
        self.in_done.set(false);
    }

    fn job_request_cancel_handler(&self) {
        if self.state.get() != ChannelState::Busy {
            return;
        }
        if let Some(h) = self.handler_request_cancel.borrow_mut().as_mut() {
            h();
        }
    }
}
