//! The component/port graph: static components wired by typed output ports,
//! dispatched synchronously by a central [`Runtime`].

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::calendar_queue::CalendarQueue;
use super::event::{ComponentId, Event, EventId};
use super::queue::{EventQueue, LinearQueue};
use super::time::{SimDuration, SimInstant};

pub type PortId = &'static str;

/// One component in the graph. `Ev` is the single domain event/payload enum
/// shared by every component in a given runtime instance.
pub trait Component<Ev> {
    /// Human-readable name, used in logs.
    fn name(&self) -> &str;

    /// Called once per delivered event, whether it arrived via a timer or
    /// via a port binding. Implementations react by calling methods on
    /// `ctx` (`emit`, `set_timer`, `cancel_timer`, `rng`, `now`) — never by
    /// holding onto `ctx` past this call.
    fn activate(&mut self, event: Ev, ctx: &mut Context<'_, Ev>);

    /// Lets callers recover the concrete component type after a run (e.g.
    /// `Runtime::component::<Node>` to read final statistics) without the
    /// graph itself needing to know about any concrete component type.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Mutable counterpart of [`Component::as_any`], used by
    /// `Runtime::component_mut` to hand an external policy (an agent, a
    /// test harness) a typed handle onto one component between runs — the
    /// "configuration-update interface" seam spec.md §1 calls for, without
    /// the graph itself knowing about any concrete component type.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// Selects which event-queue strategy backs a [`Runtime`].
pub enum QueueKind {
    Linear,
    Calendar,
}

/// Static, order-preserving fan-out table: `(component, output port)` to
/// the ordered list of `(component, input port)` destinations. Bindings are
/// frozen once [`Runtime::run`] starts; components cannot rewire the graph
/// at runtime.
#[derive(Default)]
pub struct PortGraph {
    bindings: HashMap<(ComponentId, PortId), Vec<(ComponentId, PortId)>>,
}

impl PortGraph {
    pub fn new() -> Self {
        PortGraph::default()
    }

    pub fn bind(&mut self, from: (ComponentId, PortId), to: (ComponentId, PortId)) {
        self.bindings.entry(from).or_default().push(to);
    }

    fn destinations(&self, from: (ComponentId, PortId)) -> &[(ComponentId, PortId)] {
        self.bindings.get(&from).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Handle passed to a component's `activate` call. Borrows the runtime's
/// scheduling machinery for the duration of one activation only.
pub struct Context<'a, Ev> {
    runtime: &'a mut RuntimeInner<Ev>,
    self_id: ComponentId,
}

impl<'a, Ev> Context<'a, Ev> {
    pub fn now(&self) -> SimInstant {
        self.runtime.now
    }

    pub fn component_id(&self) -> ComponentId {
        self.self_id
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.runtime.rng
    }

    /// Deliver `payload` to every destination bound to `port`, synchronously
    /// and in binding order. There is no queuing: a bound destination's
    /// `activate` runs to completion before the next destination is tried.
    /// Panics if a destination is the same component that is emitting (no
    /// re-entrant self-activation within a single activation).
    pub fn emit(&mut self, port: PortId, payload: Ev)
    where
        Ev: Clone,
    {
        let destinations = self.runtime.graph.destinations((self.self_id, port)).to_vec();
        for (target, input) in destinations {
            assert!(
                target != self.self_id,
                "component {} attempted to emit to itself via port binding",
                self.self_id
            );
            self.runtime.dispatch(target, input, payload.clone());
        }
    }

    /// Arm or re-arm a named timer on this component, firing `payload` at
    /// `self.now() + delay`. Re-arming a timer that is already pending
    /// cancels the previous firing.
    pub fn set_timer(&mut self, name: &'static str, delay: SimDuration, payload: Ev) {
        self.runtime.set_timer(self.self_id, name, delay, payload);
    }

    pub fn cancel_timer(&mut self, name: &'static str) {
        self.runtime.cancel_timer(self.self_id, name);
    }

    pub fn schedule_self(&mut self, delay: SimDuration, payload: Ev) {
        self.runtime.schedule(self.self_id, delay, payload);
    }
}

struct RuntimeInner<Ev> {
    now: SimInstant,
    rng: StdRng,
    graph: PortGraph,
    components: Vec<Option<Box<dyn Component<Ev>>>>,
    queue: Box<dyn EventQueue<Ev>>,
    next_event_seq: u64,
    next_event_id: u64,
    timers: HashMap<(ComponentId, &'static str), EventId>,
}

impl<Ev> RuntimeInner<Ev> {
    fn alloc_event_id(&mut self) -> EventId {
        let id = EventId(self.next_event_id);
        self.next_event_id += 1;
        id
    }

    fn schedule(&mut self, target: ComponentId, delay: SimDuration, payload: Ev) -> EventId {
        let id = self.alloc_event_id();
        let seq = self.next_event_seq;
        self.next_event_seq += 1;
        let time = self.now + delay;
        self.queue.push(Event {
            id,
            time,
            seq,
            target,
            payload,
        });
        id
    }

    fn set_timer(&mut self, owner: ComponentId, name: &'static str, delay: SimDuration, payload: Ev) {
        self.cancel_timer(owner, name);
        let id = self.schedule(owner, delay, payload);
        self.timers.insert((owner, name), id);
    }

    fn cancel_timer(&mut self, owner: ComponentId, name: &'static str) {
        if let Some(id) = self.timers.remove(&(owner, name)) {
            self.queue.cancel(id);
        }
    }

    /// Deliver `payload` to `target`'s `activate`, taking the component out
    /// of the slot for the duration of the call so a re-entrant `emit` that
    /// targets an in-flight component fails loudly instead of aliasing.
    fn dispatch(&mut self, target: ComponentId, _input: PortId, payload: Ev) {
        let mut component = self.components[target]
            .take()
            .unwrap_or_else(|| panic!("component {} re-entered during its own activation", target));
        {
            let mut ctx = Context {
                runtime: self,
                self_id: target,
            };
            component.activate(payload, &mut ctx);
        }
        self.components[target] = Some(component);
    }
}

/// Owns the component graph, the event queue, and the simulation's RNG.
/// Construction freezes nothing; bindings must be added before [`Runtime::run`]
/// is first called, after which the graph is treated as fixed.
pub struct Runtime<Ev> {
    inner: RuntimeInner<Ev>,
}

impl<Ev> Runtime<Ev> {
    pub fn new(seed: u64, queue_kind: QueueKind) -> Self {
        let queue: Box<dyn EventQueue<Ev>> = match queue_kind {
            QueueKind::Linear => Box::new(LinearQueue::new()),
            QueueKind::Calendar => Box::new(CalendarQueue::new()),
        };
        Runtime {
            inner: RuntimeInner {
                now: SimInstant::ZERO,
                rng: StdRng::seed_from_u64(seed),
                graph: PortGraph::new(),
                components: Vec::new(),
                queue,
                next_event_seq: 0,
                next_event_id: 0,
                timers: HashMap::new(),
            },
        }
    }

    /// Register a component, returning the id used to bind its ports and to
    /// schedule events directed at it.
    pub fn add_component(&mut self, component: Box<dyn Component<Ev>>) -> ComponentId {
        let id = self.inner.components.len();
        self.inner.components.push(Some(component));
        id
    }

    pub fn bind(&mut self, from: (ComponentId, PortId), to: (ComponentId, PortId)) {
        self.inner.graph.bind(from, to);
    }

    pub fn schedule(&mut self, target: ComponentId, delay: SimDuration, payload: Ev) -> EventId {
        self.inner.schedule(target, delay, payload)
    }

    pub fn now(&self) -> SimInstant {
        self.inner.now
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.inner.rng
    }

    /// Run until the queue drains or `until` is reached, whichever comes
    /// first. Single-threaded: exactly one event is in flight at a time.
    pub fn run_until(&mut self, until: Option<SimInstant>) {
        loop {
            let Some(next_time) = self.inner.queue.peek_time() else {
                break;
            };
            if let Some(until) = until {
                if next_time > until {
                    break;
                }
            }
            let event = self.inner.queue.pop().expect("peeked time implies an event");
            self.inner.now = event.time;
            self.inner.dispatch(event.target, "", event.payload);
        }
        if let Some(until) = until {
            if self.inner.now < until {
                self.inner.now = until;
            }
        }
    }

    pub fn run(&mut self) {
        self.run_until(None);
    }

    pub fn pending_events(&self) -> usize {
        self.inner.queue.len()
    }

    /// Downcast a registered component to its concrete type, e.g. to read
    /// final statistics off a `Node` once `run` has returned. Returns
    /// `None` if the id is out of range or the type doesn't match.
    pub fn component<T: 'static>(&self, id: ComponentId) -> Option<&T> {
        self.inner.components.get(id)?.as_ref()?.as_any().downcast_ref::<T>()
    }

    /// Mutable counterpart of [`Runtime::component`]: lets an external
    /// policy (agent, central controller, test harness) reach in and patch
    /// one component's configuration between runs, per spec.md §1's
    /// "configuration-update interface" seam. Never called from inside an
    /// `activate` — components themselves only ever see a `Context`.
    pub fn component_mut<T: 'static>(&mut self, id: ComponentId) -> Option<&mut T> {
        self.inner.components.get_mut(id)?.as_mut()?.as_any_mut().downcast_mut::<T>()
    }

    pub fn component_count(&self) -> usize {
        self.inner.components.len()
    }
}
