//! Event bus for decoupled communication
//!
//! Sync lifecycle transitions, diff review milestones and progress snapshots
//! are broadcast here so observers (UI, progress streams, tests) can follow
//! an in-flight sync without participating in its control flow.

use crate::sync::progress::SyncProgress;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Filter for event subscriptions to enable store- or run-scoped delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SubscriptionFilter {
	/// Receives every sync event for one store
	Store { store_id: Uuid },
	/// Receives every event for one sync run
	Run { run_id: Uuid },
}

impl SubscriptionFilter {
	/// Check if this filter matches the given event
	pub fn matches(&self, event: &Event) -> bool {
		match self {
			Self::Store { store_id } => event.store_id() == Some(*store_id),
			Self::Run { run_id } => event.run_id() == Some(*run_id),
		}
	}
}

/// A central event type covering everything the engine can emit
#[derive(Debug, Clone, Serialize, Deserialize, strum::AsRefStr)]
#[serde(rename_all_fields = "snake_case")]
pub enum Event {
	// Core lifecycle events
	CoreStarted,
	CoreShutdown,

	// Store management events
	StoreCreated {
		store_id: Uuid,
		name: String,
	},
	StoreDeactivated {
		store_id: Uuid,
		name: String,
		retired_entries: u64,
	},

	// Sync lifecycle events
	SyncStarted {
		store_id: Uuid,
		run_id: Uuid,
		kind: String,
	},
	SyncStateChanged {
		store_id: Uuid,
		run_id: Uuid,
		previous_state: String,
		new_state: String,
		timestamp: String,
	},
	SyncProgress {
		store_id: Uuid,
		run_id: Uuid,
		snapshot: SyncProgress,
	},
	SyncCompleted {
		store_id: Uuid,
		run_id: Uuid,
		entry_count: u64,
	},
	SyncFailed {
		store_id: Uuid,
		run_id: Uuid,
		error: String,
	},

	// Diff review events
	DiffReady {
		store_id: Uuid,
		run_id: Uuid,
		new: u64,
		modified: u64,
		removed: u64,
		unchanged: u64,
	},
	DiffApplied {
		store_id: Uuid,
		run_id: Uuid,
		applied: u64,
		skipped: u64,
	},
}

impl Event {
	/// Get the variant name of this event
	pub fn variant_name(&self) -> &str {
		self.as_ref()
	}

	/// Store this event belongs to, if any
	pub fn store_id(&self) -> Option<Uuid> {
		match self {
			Event::StoreCreated { store_id, .. }
			| Event::StoreDeactivated { store_id, .. }
			| Event::SyncStarted { store_id, .. }
			| Event::SyncStateChanged { store_id, .. }
			| Event::SyncProgress { store_id, .. }
			| Event::SyncCompleted { store_id, .. }
			| Event::SyncFailed { store_id, .. }
			| Event::DiffReady { store_id, .. }
			| Event::DiffApplied { store_id, .. } => Some(*store_id),
			_ => None,
		}
	}

	/// Sync run this event belongs to, if any
	pub fn run_id(&self) -> Option<Uuid> {
		match self {
			Event::SyncStarted { run_id, .. }
			| Event::SyncStateChanged { run_id, .. }
			| Event::SyncProgress { run_id, .. }
			| Event::SyncCompleted { run_id, .. }
			| Event::SyncFailed { run_id, .. }
			| Event::DiffReady { run_id, .. }
			| Event::DiffApplied { run_id, .. } => Some(*run_id),
			_ => None,
		}
	}
}

/// A filtered subscriber with its own broadcast channel
#[derive(Debug)]
struct FilteredSubscriber {
	id: Uuid,
	filters: Vec<SubscriptionFilter>,
	sender: broadcast::Sender<Event>,
}

/// Event bus for broadcasting events with optional filtering
#[derive(Debug, Clone)]
pub struct EventBus {
	// Broadcast for unfiltered subscriptions
	sender: broadcast::Sender<Event>,
	// Filtered subscribers
	subscribers: Arc<RwLock<Vec<FilteredSubscriber>>>,
}

impl EventBus {
	/// Create a new event bus with specified capacity
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self {
			sender,
			subscribers: Arc::new(RwLock::new(Vec::new())),
		}
	}

	/// Emit an event to all subscribers (filtered and unfiltered)
	pub fn emit(&self, event: Event) {
		// No unfiltered subscribers is not an error
		let _ = self.sender.send(event.clone());

		let Ok(subscribers) = self.subscribers.read() else {
			return;
		};
		let mut matched_count = 0;

		for subscriber in subscribers.iter() {
			let matches = subscriber
				.filters
				.iter()
				.any(|filter| filter.matches(&event));

			if matches && subscriber.sender.send(event.clone()).is_ok() {
				matched_count += 1;
			}
		}

		if matched_count > 0 {
			debug!(
				event = event.variant_name(),
				matched_count, "Event emitted to filtered subscribers"
			);
		}
	}

	/// Subscribe to all events (unfiltered)
	pub fn subscribe(&self) -> EventSubscriber {
		EventSubscriber {
			receiver: self.sender.subscribe(),
			subscription_id: None,
			event_bus: None,
		}
	}

	/// Subscribe with filters
	pub fn subscribe_filtered(&self, filters: Vec<SubscriptionFilter>) -> EventSubscriber {
		let id = Uuid::new_v4();
		let (sender, receiver) = broadcast::channel(1024);

		let subscriber = FilteredSubscriber {
			id,
			filters,
			sender,
		};

		if let Ok(mut subscribers) = self.subscribers.write() {
			subscribers.push(subscriber);
		}

		debug!(subscription_id = %id, "Created filtered subscription");

		EventSubscriber {
			receiver,
			subscription_id: Some(id),
			event_bus: Some(self.clone()),
		}
	}

	/// Unsubscribe a filtered subscription
	pub fn unsubscribe(&self, subscription_id: Uuid) {
		if let Ok(mut subscribers) = self.subscribers.write() {
			subscribers.retain(|s| s.id != subscription_id);
		}
		debug!(subscription_id = %subscription_id, "Unsubscribed filtered subscription");
	}

	/// Get the number of active subscribers (unfiltered + filtered)
	pub fn subscriber_count(&self) -> usize {
		let filtered_count = self.subscribers.read().map(|s| s.len()).unwrap_or(0);
		self.sender.receiver_count() + filtered_count
	}

	/// Clean up closed subscriber channels
	pub fn cleanup_closed_subscribers(&self) {
		let Ok(mut subscribers) = self.subscribers.write() else {
			return;
		};
		let before = subscribers.len();
		subscribers.retain(|s| s.sender.receiver_count() > 0);
		let removed = before - subscribers.len();
		if removed > 0 {
			debug!(removed, "Cleaned up closed filtered subscriptions");
		}
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1024)
	}
}

/// Event subscriber for receiving events
#[derive(Debug)]
pub struct EventSubscriber {
	receiver: broadcast::Receiver<Event>,
	subscription_id: Option<Uuid>,
	event_bus: Option<EventBus>,
}

impl EventSubscriber {
	/// Receive the next event (blocking)
	pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
		self.receiver.recv().await
	}

	/// Try to receive an event without blocking
	pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
		self.receiver.try_recv()
	}

	/// Filter events by type using a closure
	pub async fn recv_filtered<F>(
		&mut self,
		filter: F,
	) -> Result<Event, broadcast::error::RecvError>
	where
		F: Fn(&Event) -> bool,
	{
		loop {
			let event = self.recv().await?;
			if filter(&event) {
				return Ok(event);
			}
		}
	}

	/// Get the subscription ID if this is a filtered subscription
	pub fn subscription_id(&self) -> Option<Uuid> {
		self.subscription_id
	}
}

impl Drop for EventSubscriber {
	fn drop(&mut self) {
		// Auto-unsubscribe filtered subscriptions when dropped
		if let (Some(id), Some(bus)) = (self.subscription_id, &self.event_bus) {
			bus.unsubscribe(id);
		}
	}
}

/// Helper trait for event filtering
pub trait EventFilter {
	fn is_sync_event(&self) -> bool;
	fn is_diff_event(&self) -> bool;
	fn is_for_store(&self, store_id: Uuid) -> bool;
	fn is_for_run(&self, run_id: Uuid) -> bool;
}

impl EventFilter for Event {
	fn is_sync_event(&self) -> bool {
		matches!(
			self,
			Event::SyncStarted { .. }
				| Event::SyncStateChanged { .. }
				| Event::SyncProgress { .. }
				| Event::SyncCompleted { .. }
				| Event::SyncFailed { .. }
		)
	}

	fn is_diff_event(&self) -> bool {
		matches!(self, Event::DiffReady { .. } | Event::DiffApplied { .. })
	}

	fn is_for_store(&self, store_id: Uuid) -> bool {
		self.store_id() == Some(store_id)
	}

	fn is_for_run(&self, run_id: Uuid) -> bool {
		self.run_id() == Some(run_id)
	}
}
