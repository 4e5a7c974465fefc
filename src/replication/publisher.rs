//! Publishes local facts to the concern logs

use std::sync::Arc;
use tracing::{error, trace};
use uuid::Uuid;

use super::codec;
use super::log::FactLog;
use crate::game::{DomainEvent, EventSink};

/// [`EventSink`] that appends every fact to its concern's log
pub struct ReplicationSink {
    log: Arc<dyn FactLog>,
    node_id: Uuid,
}

impl ReplicationSink {
    pub fn new(log: Arc<dyn FactLog>, node_id: Uuid) -> Self {
        Self { log, node_id }
    }
}

impl EventSink for ReplicationSink {
    fn dispatch(&self, event: DomainEvent) {
        let value = match codec::encode(&event) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, concern = %event.concern, key = %event.key, "Dropping unencodable fact");
                return;
            }
        };
        let (partition, offset) =
            self.log
                .append(event.concern, event.key, event.timestamp, self.node_id, value);
        trace!(concern = %event.concern, key = %event.key, partition, offset, "Fact published");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Concern, EntityId, EventPayload};
    use crate::replication::log::{partition_for, MemoryLog};

    #[test]
    fn facts_land_on_their_concern_log() {
        let log = Arc::new(MemoryLog::new(2, 1_500));
        let node = Uuid::new_v4();
        let sink = ReplicationSink::new(log.clone(), node);
        let key = EntityId::new();

        sink.dispatch(DomainEvent::new(key, 5, EventPayload::PlayerJoined));
        sink.dispatch(DomainEvent::tombstone(Concern::Score, key, 6));

        let partition = partition_for(key, 2);
        let joins = log.read(Concern::JoinLeave, partition, 0, 10);
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].origin, node);
        assert!(joins[0].value.is_some());

        let scores = log.read(Concern::Score, partition, 0, 10);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].value, None);
        assert_eq!(log.len(Concern::PlayerAction), 0);
    }
}
