// Event Bus Implementation - Pub/Sub for Domain Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Enables real-time event streaming to the API surface and observers.
// In-memory only: events are lost on restart.

use crate::domain::events::{MemoryEvent, TaskEvent, WorkerEvent};
use crate::domain::task::TaskId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Task(TaskEvent),
    Worker(WorkerEvent),
    Memory(MemoryEvent),
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity.
    /// Capacity determines how many events can be buffered before
    /// dropping old ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_task_event(&self, event: TaskEvent) {
        self.publish(DomainEvent::Task(event));
    }

    pub fn publish_worker_event(&self, event: WorkerEvent) {
        self.publish(DomainEvent::Worker(event));
    }

    pub fn publish_memory_event(&self, event: MemoryEvent) {
        self.publish(DomainEvent::Memory(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);

        // send() returns the number of receivers; zero subscribers is
        // not an error.
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for a single task's events
    pub fn subscribe_task(&self, task_id: TaskId) -> TaskEventReceiver {
        TaskEventReceiver {
            receiver: self.sender.subscribe(),
            task_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Receive the next event (blocks until one is available)
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => EventBusError::Lagged(n),
        })
    }
}

/// Receiver filtered to one task's events
pub struct TaskEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    task_id: TaskId,
}

impl TaskEventReceiver {
    /// Receive the next event for the subscribed task, skipping others.
    pub async fn recv(&mut self) -> Result<TaskEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => EventBusError::Lagged(n),
            })?;
            if let DomainEvent::Task(task_event) = event {
                if event_task_id(&task_event) == self.task_id {
                    return Ok(task_event);
                }
            }
        }
    }
}

fn event_task_id(event: &TaskEvent) -> TaskId {
    match event {
        TaskEvent::TaskSubmitted { task_id, .. }
        | TaskEvent::TaskShortCircuited { task_id, .. }
        | TaskEvent::PlanResolved { task_id, .. }
        | TaskEvent::StepDispatched { task_id, .. }
        | TaskEvent::StepSucceeded { task_id, .. }
        | TaskEvent::StepFailed { task_id, .. }
        | TaskEvent::SwarmBallotClosed { task_id, .. }
        | TaskEvent::RepairAttempted { task_id, .. }
        | TaskEvent::TaskCompleted { task_id, .. }
        | TaskEvent::TaskFailed { task_id, .. }
        | TaskEvent::TaskCancelled { task_id, .. } => *task_id,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus channel closed")]
    Closed,

    #[error("no event available")]
    Empty,

    #[error("receiver lagged by {0} events")]
    Lagged(u64),
}
