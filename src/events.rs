//! Lifecycle events published around repository mutations.
//!
//! Dispatch is synchronous: `publish` returns after every subscribed listener
//! has run. Listeners subscribe explicitly for the actions they care about.

use std::fmt;
use std::sync::{Arc, RwLock};

use metrics::counter;
use serde::{Serialize, Serializer};
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::lock::{rw_read, rw_write};
use crate::model::Record;
use crate::query::Query;

const SOURCE: &str = "events";

/// Identity of the repository that emitted an event; cache keys are grouped by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryId(Arc<str>);

impl RepositoryId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Serialize for RepositoryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryAction {
    Creating,
    Created,
    Updating,
    Updated,
    Deleting,
    Deleted,
}

impl RepositoryAction {
    pub const COMPLETED: [RepositoryAction; 3] = [
        RepositoryAction::Created,
        RepositoryAction::Updated,
        RepositoryAction::Deleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RepositoryAction::Creating => "creating",
            RepositoryAction::Created => "created",
            RepositoryAction::Updating => "updating",
            RepositoryAction::Updated => "updated",
            RepositoryAction::Deleting => "deleting",
            RepositoryAction::Deleted => "deleted",
        }
    }

    /// `*-ed` actions fire after the engine call succeeded.
    pub fn is_completed(self) -> bool {
        Self::COMPLETED.contains(&self)
    }
}

impl fmt::Display for RepositoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an event is about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Subject {
    /// A persisted row.
    Entity(Record),
    /// Attributes that have not been persisted yet.
    Attributes(Record),
    /// The conditions of a bulk delete.
    Query(Query),
}

impl Subject {
    pub fn record(&self) -> Option<&Record> {
        match self {
            Subject::Entity(record) | Subject::Attributes(record) => Some(record),
            Subject::Query(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventContext {
    pub id: Uuid,
    pub occurred_at: OffsetDateTime,
    pub repository: RepositoryId,
    pub subject: Subject,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "context", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Creating(EventContext),
    Created(EventContext),
    Updating(EventContext),
    Updated(EventContext),
    Deleting(EventContext),
    Deleted(EventContext),
}

impl LifecycleEvent {
    pub fn new(action: RepositoryAction, repository: RepositoryId, subject: Subject) -> Self {
        let context = EventContext {
            id: Uuid::new_v4(),
            occurred_at: OffsetDateTime::now_utc(),
            repository,
            subject,
        };
        match action {
            RepositoryAction::Creating => LifecycleEvent::Creating(context),
            RepositoryAction::Created => LifecycleEvent::Created(context),
            RepositoryAction::Updating => LifecycleEvent::Updating(context),
            RepositoryAction::Updated => LifecycleEvent::Updated(context),
            RepositoryAction::Deleting => LifecycleEvent::Deleting(context),
            RepositoryAction::Deleted => LifecycleEvent::Deleted(context),
        }
    }

    pub fn action(&self) -> RepositoryAction {
        match self {
            LifecycleEvent::Creating(_) => RepositoryAction::Creating,
            LifecycleEvent::Created(_) => RepositoryAction::Created,
            LifecycleEvent::Updating(_) => RepositoryAction::Updating,
            LifecycleEvent::Updated(_) => RepositoryAction::Updated,
            LifecycleEvent::Deleting(_) => RepositoryAction::Deleting,
            LifecycleEvent::Deleted(_) => RepositoryAction::Deleted,
        }
    }

    pub fn context(&self) -> &EventContext {
        match self {
            LifecycleEvent::Creating(context)
            | LifecycleEvent::Created(context)
            | LifecycleEvent::Updating(context)
            | LifecycleEvent::Updated(context)
            | LifecycleEvent::Deleting(context)
            | LifecycleEvent::Deleted(context) => context,
        }
    }

    pub fn repository(&self) -> &RepositoryId {
        &self.context().repository
    }

    pub fn subject(&self) -> &Subject {
        &self.context().subject
    }
}

/// Receives lifecycle events on the publishing thread.
pub trait Listener: Send + Sync {
    fn handle(&self, event: &LifecycleEvent);
}

impl<F> Listener for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn handle(&self, event: &LifecycleEvent) {
        self(event)
    }
}

struct Subscription {
    actions: Vec<RepositoryAction>,
    listener: Arc<dyn Listener>,
}

/// In-process, synchronous event bus shared by repository sessions.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<I>(&self, actions: I, listener: Arc<dyn Listener>)
    where
        I: IntoIterator<Item = RepositoryAction>,
    {
        let actions: Vec<RepositoryAction> = actions.into_iter().collect();
        debug!(?actions, "Lifecycle listener subscribed");
        rw_write(&self.subscriptions, SOURCE, "subscribe").push(Subscription { actions, listener });
    }

    /// Deliver `event` to every listener subscribed to its action, in
    /// subscription order. Returns the number of listeners that ran.
    pub fn publish(&self, event: &LifecycleEvent) -> usize {
        let action = event.action();
        let listeners: Vec<Arc<dyn Listener>> = rw_read(&self.subscriptions, SOURCE, "publish")
            .iter()
            .filter(|subscription| subscription.actions.contains(&action))
            .map(|subscription| Arc::clone(&subscription.listener))
            .collect();

        info!(
            event_id = %event.context().id,
            repository = %event.repository(),
            action = action.as_str(),
            listeners = listeners.len(),
            "Lifecycle event published"
        );
        counter!("quarry_lifecycle_event_total", "action" => action.as_str()).increment(1);

        for listener in &listeners {
            listener.handle(event);
        }
        listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        rw_read(&self.subscriptions, SOURCE, "listener_count").len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
