//! The timer service that drives retransmission and timeouts of all machines.
//!
//! A single worker task owns a [TimerHeap] and sleeps until the earliest deadline. Machines never
//!  touch the heap: they hold a [Timer] that sends start / stop commands to the worker through an
//!  unbounded channel, so arming or stopping a timer never blocks.
//!
//! When a timer elapses, the worker pushes an [Elapsed] into the owning machine set's event
//!  queue. Every arm of a timer gets a new generation number, and the owner only accepts an
//!  [Elapsed] for the generation that is currently armed. So re-arming or stopping a timer
//!  effectively retracts an elapse event that was already delivered but not yet consumed - a
//!  machine that finished just before its timeout fired is never spuriously re-entered.

use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};
use crate::events::TimerEvent;
use crate::timers::timer_heap::TimerHeap;

pub mod timer_heap;

#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Debug)]
pub struct TimerId(u64);

impl TimerId {
    pub const fn from_raw(raw: u64) -> TimerId {
        TimerId(raw)
    }

    pub fn to_raw(&self) -> u64 {
        self.0
    }
}

impl Display for TimerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The message a timer puts into its output queue when it elapses
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Elapsed {
    pub timer_id: TimerId,
    pub generation: u64,
    pub event: TimerEvent,
}

pub enum TimerCommand {
    Start {
        timer_id: TimerId,
        deadline: Instant,
        event: TimerEvent,
        fire: Box<dyn FnOnce() + Send>,
    },
    Stop {
        timer_id: TimerId,
    },
}

impl Debug for TimerCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerCommand::Start { timer_id, deadline, event, .. } => {
                write!(f, "Start({}, {:?}, {:?})", timer_id, deadline, event)
            }
            TimerCommand::Stop { timer_id } => {
                write!(f, "Stop({})", timer_id)
            }
        }
    }
}

#[derive(Clone)]
pub struct TimerService {
    commands: mpsc::UnboundedSender<TimerCommand>,
    id_counter: Arc<AtomicU64>,
}

impl TimerService {
    /// The returned receiver is meant to be driven by [run_timers]
    pub fn new() -> (TimerService, mpsc::UnboundedReceiver<TimerCommand>) {
        let (send, recv) = mpsc::unbounded_channel();
        let service = TimerService {
            commands: send,
            id_counter: Default::default(),
        };
        (service, recv)
    }

    /// Creates an inactive timer that delivers its elapse events to `output`
    pub fn create<Q: From<Elapsed> + Send + 'static>(&self, output: mpsc::UnboundedSender<Q>) -> Timer<Q> {
        Timer {
            timer_id: TimerId(self.id_counter.fetch_add(1, Ordering::Relaxed)),
            service: self.clone(),
            output,
            event: None,
            generation: 0,
            armed: None,
        }
    }

    fn send_command(&self, command: TimerCommand) {
        if self.commands.send(command).is_err() {
            debug!("timer service is shut down - ignoring timer command");
        }
    }
}

/// A single timer, owned by exactly one machine
pub struct Timer<Q: From<Elapsed> + Send + 'static> {
    timer_id: TimerId,
    service: TimerService,
    output: mpsc::UnboundedSender<Q>,
    event: Option<TimerEvent>,
    generation: u64,
    /// the generation of the currently armed timer, if any
    armed: Option<u64>,
}

impl<Q: From<Elapsed> + Send + 'static> Timer<Q> {
    pub fn timer_id(&self) -> TimerId {
        self.timer_id
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Arms the timer, replacing a previous deadline. Passing `None` as the event re-uses the
    ///  event from the previous call.
    pub fn start(&mut self, interval: Duration, event: Option<TimerEvent>) {
        if event.is_some() {
            self.event = event;
        }
        let Some(event) = self.event else {
            warn!("timer {} started without ever being given an event - ignoring", self.timer_id);
            return;
        };

        self.generation += 1;
        self.armed = Some(self.generation);

        let elapsed = Elapsed {
            timer_id: self.timer_id,
            generation: self.generation,
            event,
        };
        let output = self.output.clone();

        trace!("starting timer {} ({:?}) for {:?}", self.timer_id, event, interval);
        self.service.send_command(TimerCommand::Start {
            timer_id: self.timer_id,
            deadline: Instant::now() + interval,
            event,
            fire: Box::new(move || {
                if output.send(Q::from(elapsed)).is_err() {
                    trace!("timer {} elapsed, but its owner's queue is closed", elapsed.timer_id);
                }
            }),
        });
    }

    /// Deactivates the timer. Stopping a timer that is not armed is a no-op.
    pub fn stop(&mut self) {
        if self.armed.take().is_some() {
            trace!("stopping timer {}", self.timer_id);
            self.service.send_command(TimerCommand::Stop { timer_id: self.timer_id });
        }
    }

    pub fn destroy(mut self) {
        self.stop();
    }

    /// Checks an elapse event against this timer: only the most recent arm of the timer is
    ///  live, anything else is a leftover from before a stop or re-arm. Accepting an elapse event
    ///  disarms the timer.
    pub fn accept(&mut self, elapsed: &Elapsed) -> bool {
        if elapsed.timer_id == self.timer_id && self.armed == Some(elapsed.generation) {
            self.armed = None;
            true
        }
        else {
            false
        }
    }
}

impl<Q: From<Elapsed> + Send + 'static> Drop for Timer<Q> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The timer worker loop. It terminates when all [TimerService] handles (and thereby all
///  timers) are dropped.
pub async fn run_timers(mut commands: mpsc::UnboundedReceiver<TimerCommand>) {
    let mut heap: TimerHeap<Box<dyn FnOnce() + Send>> = TimerHeap::new();

    let sleep = time::sleep_until(Instant::now());
    tokio::pin!(sleep);

    loop {
        select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    debug!("all timer handles are dropped - shutting down timer service with {} pending timers", heap.len());
                    return;
                };

                let top_changed = match cmd {
                    TimerCommand::Start { timer_id, deadline, event: _, fire } => heap.insert(timer_id, deadline, fire),
                    TimerCommand::Stop { timer_id } => heap.remove(timer_id),
                };
                if top_changed {
                    if let Some(deadline) = heap.peek_deadline() {
                        sleep.as_mut().reset(deadline);
                    }
                }
            }
            _ = &mut sleep, if !heap.is_empty() => {
                for (timer_id, fire) in heap.pop_expired(Instant::now()) {
                    trace!("timer {} elapsed", timer_id);
                    fire();
                }
                if let Some(deadline) = heap.peek_deadline() {
                    sleep.as_mut().reset(deadline);
                }
            }
        }
    }
}
