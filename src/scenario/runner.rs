//! 场景运行器
//!
//! 输出端是一个“定速”接收方：每一轮先把 job 跑空，然后才完成它手上
//! 的那个包。这样所有排队的流都有机会在下一次调度前入队，调度顺序
//! 只取决于队列策略。

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, info};

use crate::flow::{PacketPassHandle, PacketPassInterface};
use crate::pending::PendingGroup;
use crate::queue::{
    FairQueueConfig, PacketPassFairQueue, PacketPassFairQueueFlow, PacketPassPriorityQueue,
    PacketPassPriorityQueueFlow,
};
use crate::trace::{TraceEvent, TraceEventKind, TraceFlowInfo, TraceLogger};

use super::{FlowSpec, QueueSpec, Scenario, ScenarioError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowSummary {
    pub name: String,
    /// 已完成（生产者收到 done）的包数
    pub packets: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub rounds: u64,
    pub flows: Vec<FlowSummary>,
}

enum Queue {
    Fair(PacketPassFairQueue),
    Priority(PacketPassPriorityQueue),
}

enum QueueFlow {
    Fair(PacketPassFairQueueFlow),
    Priority(PacketPassPriorityQueueFlow),
}

impl Queue {
    fn build(
        spec: QueueSpec,
        output: PacketPassHandle,
        pg: &PendingGroup,
        use_cancel: bool,
    ) -> Result<Self, ScenarioError> {
        let queue = match spec {
            QueueSpec::Fair { packet_weight } => Queue::Fair(PacketPassFairQueue::new(
                output,
                pg,
                FairQueueConfig { packet_weight },
            )?),
            QueueSpec::Priority => Queue::Priority(PacketPassPriorityQueue::new(output, pg)),
        };
        if use_cancel {
            match &queue {
                Queue::Fair(q) => q.enable_cancel(),
                Queue::Priority(q) => q.enable_cancel(),
            }
        }
        Ok(queue)
    }

    fn new_flow(&self, priority: i32) -> QueueFlow {
        match self {
            Queue::Fair(q) => QueueFlow::Fair(PacketPassFairQueueFlow::new(q)),
            Queue::Priority(q) => {
                QueueFlow::Priority(PacketPassPriorityQueueFlow::new(q, priority))
            }
        }
    }

    fn prepare_free(&self) {
        match self {
            Queue::Fair(q) => q.prepare_free(),
            Queue::Priority(q) => q.prepare_free(),
        }
    }
}

impl QueueFlow {
    fn input(&self) -> PacketPassHandle {
        match self {
            QueueFlow::Fair(f) => f.input(),
            QueueFlow::Priority(f) => f.input(),
        }
    }

    fn is_busy(&self) -> bool {
        match self {
            QueueFlow::Fair(f) => f.is_busy(),
            QueueFlow::Priority(f) => f.is_busy(),
        }
    }

    fn release(&self) {
        match self {
            QueueFlow::Fair(f) => f.release(),
            QueueFlow::Priority(f) => f.release(),
        }
    }
}

#[derive(Debug, Default)]
struct Producer {
    remaining: u64,
    in_flight: bool,
    completed_packets: u64,
    completed_bytes: u64,
}

#[derive(Default)]
struct Recorder {
    round: Cell<u64>,
    events: RefCell<Vec<TraceEvent>>,
}

impl Recorder {
    fn push(&self, flow: &str, bytes: usize, kind: TraceEventKind) {
        self.events.borrow_mut().push(TraceEvent {
            round: self.round.get(),
            flow: Some(flow.to_string()),
            bytes: Some(bytes),
            kind,
        });
    }
}

struct Slot<'a> {
    spec: &'a FlowSpec,
    flow: Option<QueueFlow>,
    producer: Rc<RefCell<Producer>>,
    started: bool,
}

impl Slot<'_> {
    fn is_idle(&self) -> bool {
        if !self.started {
            return false;
        }
        if self.flow.is_none() {
            return true;
        }
        let p = self.producer.borrow();
        p.remaining == 0 && !p.in_flight
    }
}

fn send_next(input: &PacketPassHandle, producer: &RefCell<Producer>, fill: u8, bytes: usize) {
    {
        let mut p = producer.borrow_mut();
        if p.remaining == 0 {
            return;
        }
        p.remaining -= 1;
        p.in_flight = true;
    }
    input.send(vec![fill; bytes]);
}

fn meta_event(scenario: &Scenario) -> TraceEvent {
    TraceEvent {
        round: 0,
        flow: None,
        bytes: None,
        kind: TraceEventKind::Meta {
            queue: scenario.queue.name().to_string(),
            mtu: scenario.mtu,
            flows: scenario
                .flows
                .iter()
                .map(|f| TraceFlowInfo {
                    name: f.name.clone(),
                    priority: f.priority,
                    packets: f.packets,
                    packet_bytes: f.packet_bytes,
                })
                .collect(),
        },
    }
}

/// 运行场景直到所有流发完或达到 `max_rounds`
///
/// 传入的 `trace` 会被这次运行的轨迹整体替换。
#[tracing::instrument(skip(scenario, trace), fields(queue = scenario.queue.name(), flows = scenario.flows.len()))]
pub fn run_scenario(
    scenario: &Scenario,
    trace: Option<&mut TraceLogger>,
) -> Result<RunSummary, ScenarioError> {
    scenario.validate()?;
    info!("▶️  开始运行场景");

    let pg = PendingGroup::new();
    let recorder = Rc::new(Recorder::default());

    let held: Rc<RefCell<Option<Vec<u8>>>> = Rc::new(RefCell::new(None));
    let sink = {
        let held = held.clone();
        PacketPassInterface::new(scenario.mtu, &pg, move |data| {
            *held.borrow_mut() = Some(data);
        })
    };
    if scenario.use_cancel {
        let held = held.clone();
        sink.enable_cancel(move || {
            held.borrow_mut().take();
        });
    }

    let queue = Queue::build(scenario.queue, sink.handle(), &pg, scenario.use_cancel)?;

    let mut slots: Vec<Slot<'_>> = scenario
        .flows
        .iter()
        .enumerate()
        .map(|(idx, spec)| {
            let flow = queue.new_flow(spec.priority);
            let producer = Rc::new(RefCell::new(Producer {
                remaining: spec.packets,
                ..Producer::default()
            }));
            let input = flow.input();
            {
                let producer = producer.clone();
                let recorder = recorder.clone();
                let input_w = input.clone();
                let name = spec.name.clone();
                let bytes = spec.packet_bytes;
                let fill = idx as u8;
                input.sender_init(move || {
                    {
                        let mut p = producer.borrow_mut();
                        p.in_flight = false;
                        p.completed_packets += 1;
                        p.completed_bytes += bytes as u64;
                    }
                    recorder.push(&name, bytes, TraceEventKind::Complete);
                    send_next(&input_w, &producer, fill, bytes);
                });
            }
            Slot {
                spec,
                flow: Some(flow),
                producer,
                started: false,
            }
        })
        .collect();

    let mut round = 0u64;
    while round < scenario.max_rounds {
        recorder.round.set(round);

        for (idx, slot) in slots.iter_mut().enumerate() {
            if !slot.started && slot.spec.start_round <= round {
                slot.started = true;
                if let Some(flow) = &slot.flow {
                    debug!(flow = %slot.spec.name, round, "流开始发送");
                    send_next(
                        &flow.input(),
                        &slot.producer,
                        idx as u8,
                        slot.spec.packet_bytes,
                    );
                }
            }
            if slot.spec.release_at_round != Some(round) {
                continue;
            }
            if let Some(flow) = slot.flow.take() {
                if flow.is_busy() {
                    flow.release();
                    recorder.push(
                        &slot.spec.name,
                        slot.spec.packet_bytes,
                        TraceEventKind::Release,
                    );
                }
                debug!(flow = %slot.spec.name, round, "释放流");
                drop(flow);
                slot.started = true;
            }
        }
        pg.run();

        let taken = held.borrow_mut().take();
        match taken {
            Some(pkt) => {
                let name = slots
                    .iter()
                    .find(|s| s.flow.as_ref().is_some_and(QueueFlow::is_busy))
                    .map(|s| s.spec.name.clone())
                    .unwrap_or_default();
                recorder.push(&name, pkt.len(), TraceEventKind::Dispatch);
                sink.done();
                pg.run();
            }
            None => {
                if slots.iter().all(Slot::is_idle) {
                    break;
                }
            }
        }
        round += 1;
    }

    if round >= scenario.max_rounds {
        info!(max_rounds = scenario.max_rounds, "达到最大轮数，停止运行");
    }

    let flows = slots
        .iter()
        .map(|s| {
            let p = s.producer.borrow();
            FlowSummary {
                name: s.spec.name.clone(),
                packets: p.completed_packets,
                bytes: p.completed_bytes,
            }
        })
        .collect();

    queue.prepare_free();
    for slot in &mut slots {
        slot.flow.take();
    }
    drop(queue);
    drop(sink);

    // 一个 logger 只保存一次运行的轨迹，meta 必须是第一条
    if let Some(logger) = trace {
        if !logger.is_empty() {
            debug!(discarded = logger.len(), "丢弃 logger 中上一次运行的事件");
            logger.events.clear();
        }
        logger.push(meta_event(scenario));
        logger.events.extend(recorder.events.take());
    }

    info!(rounds = round, "✅ 场景运行结束");
    Ok(RunSummary {
        rounds: round,
        flows,
    })
}
