use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{MediaBackend, TransportHandle};
use crate::config::{Direction, Instance};
use crate::error::{Aes67Error, Result};
use crate::status::TransportStatus;

/// Send and receive handles, keyed by instance id.
#[derive(Default)]
pub(crate) struct TransportMaps {
    pub(crate) send: BTreeMap<u32, TransportHandle>,
    pub(crate) recv: BTreeMap<u32, TransportHandle>,
}

impl TransportMaps {
    pub(crate) fn map(&mut self, direction: Direction) -> &mut BTreeMap<u32, TransportHandle> {
        match direction {
            Direction::Send => &mut self.send,
            Direction::Receive => &mut self.recv,
        }
    }

    fn handles(&self) -> impl Iterator<Item = &TransportHandle> {
        self.send.values().chain(self.recv.values())
    }
}

/// Owns every running transport.
///
/// Cloning is cheap; clones share the same maps. One mutex guards both
/// directions so a watchdog scan never sees a half-rebuilt registry.
#[derive(Clone)]
pub struct TransportRegistry {
    backend: Arc<dyn MediaBackend>,
    pub(crate) maps: Arc<Mutex<TransportMaps>>,
}

impl TransportRegistry {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            maps: Arc::new(Mutex::new(TransportMaps::default())),
        }
    }

    pub fn backend(&self) -> &Arc<dyn MediaBackend> {
        &self.backend
    }

    /// Build and start the transport for `instance` in `direction`.
    ///
    /// A failure leaves every other transport untouched. An existing handle
    /// for the same instance and direction is stopped and replaced.
    pub fn create_transport(&self, instance: &Instance, direction: Direction) -> Result<()> {
        let mut maps = self.maps.lock();

        if let Some(mut old) = maps.map(direction).remove(&instance.id) {
            tracing::debug!(instance_id = instance.id, %direction, "replacing existing transport");
            old.pipeline.stop();
        }

        let pipeline = self.backend.create(instance, direction).map_err(|e| {
            tracing::error!(
                instance_id = instance.id,
                name = %instance.name,
                %direction,
                backend = self.backend.name(),
                error = %e,
                "failed to create transport"
            );
            match e {
                Aes67Error::TransportCreate { .. } => e,
                other => Aes67Error::TransportCreate {
                    instance_id: instance.id,
                    direction: direction.as_str(),
                    reason: other.to_string(),
                },
            }
        })?;

        tracing::info!(
            instance_id = instance.id,
            name = %instance.name,
            %direction,
            multicast = %instance.multicast_address,
            port = instance.port,
            channels = instance.channel_count,
            ptime_ms = instance.packet_time_ms,
            "transport started"
        );
        maps.map(direction)
            .insert(instance.id, TransportHandle::new(instance, direction, pipeline));
        Ok(())
    }

    /// Stop and drop every transport. Always leaves both maps empty.
    pub fn stop_all(&self) {
        let mut maps = self.maps.lock();
        let count = maps.send.len() + maps.recv.len();
        for (_, mut handle) in std::mem::take(&mut maps.send)
            .into_iter()
            .chain(std::mem::take(&mut maps.recv))
        {
            handle.pipeline.stop();
            tracing::debug!(instance_id = handle.instance_id, direction = %handle.direction, "transport stopped");
        }
        if count > 0 {
            tracing::info!(count, "all transports stopped");
        }
    }

    /// Send transports first, then receive, each ordered by instance id.
    pub fn statuses(&self) -> Vec<TransportStatus> {
        self.maps
            .lock()
            .handles()
            .map(|h| TransportStatus {
                instance_id: h.instance_id,
                name: h.name.clone(),
                direction: h.direction,
                running: h.running,
                error: h.last_error.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        let maps = self.maps.lock();
        maps.send.len() + maps.recv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn running_count(&self, direction: Direction) -> usize {
        self.maps
            .lock()
            .map(direction)
            .values()
            .filter(|h| h.running)
            .count()
    }
}
