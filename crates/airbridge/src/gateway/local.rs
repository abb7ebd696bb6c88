//! In-process object table for the local BACnet device
//!
//! The pipeline writes through [`ProtocolGateway`]. The BACnet/IP transport
//! reads the table and feeds inbound discovery traffic in through
//! [`LocalGateway::who_is`], [`LocalGateway::send_who_is`] and
//! [`LocalGateway::i_am`]; those are its entry points and the binary itself
//! never calls them.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::discovery::DiscoveryResponder;
use super::types::{DiscoveredDevice, IAm, LocalDevice, ObjectIdentifier, WhoIs};
use super::{GatewayError, GatewayResult, ProtocolGateway};
use crate::registry::{Point, PointValue};
use crate::units::EngineeringUnit;

/// Object as seen by network readers
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry {
    pub object_name: String,
    pub units: Option<EngineeringUnit>,
    pub present_value: PointValue,
}

/// Object table plus discovery state for the local device.
///
/// Present values are written only through [`ProtocolGateway`]; readers may
/// query the table concurrently.
pub struct LocalGateway {
    objects: DashMap<ObjectIdentifier, ObjectEntry>,
    responder: Mutex<DiscoveryResponder>,
    announcements: AtomicU64,
}

impl LocalGateway {
    pub fn new(device: LocalDevice) -> Self {
        Self {
            objects: DashMap::new(),
            responder: Mutex::new(DiscoveryResponder::new(device)),
            announcements: AtomicU64::new(0),
        }
    }

    pub fn device(&self) -> LocalDevice {
        self.responder.lock().local().clone()
    }

    /// Look up an object by identifier
    pub fn read(&self, identifier: ObjectIdentifier) -> Option<ObjectEntry> {
        self.objects.get(&identifier).map(|entry| entry.clone())
    }

    /// Present value of an object
    pub fn read_present_value(&self, identifier: ObjectIdentifier) -> Option<PointValue> {
        self.objects
            .get(&identifier)
            .map(|entry| entry.present_value.clone())
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Number of I-Am announcements sent so far
    pub fn announcements(&self) -> u64 {
        self.announcements.load(Ordering::SeqCst)
    }

    /// Inbound Who-Is: our I-Am if we are inside the requested range
    pub fn who_is(&self, request: &WhoIs) -> Option<IAm> {
        let reply = self.responder.lock().on_who_is(request);
        match &reply {
            Some(_) => tracing::debug!(?request, "Answering Who-Is"),
            None => tracing::trace!(?request, "Who-Is outside local instance range"),
        }
        reply
    }

    /// Track an outgoing Who-Is so I-Am replies can be matched against it
    pub fn send_who_is(&self, request: WhoIs) {
        tracing::debug!(
            "Sent Who-Is (low={:?}, high={:?})",
            request.low_limit,
            request.high_limit
        );
        self.responder.lock().record_who_is(request);
    }

    /// Inbound I-Am. Malformed replies are logged and dropped.
    pub fn i_am(&self, reply: &IAm) -> Option<DiscoveredDevice> {
        match self.responder.lock().on_i_am(reply) {
            Ok(Some(device)) => {
                tracing::info!(
                    "Discovered device {} at {} (vendor={}, max_apdu={}, segmentation={:?})",
                    device.device_id,
                    device.address,
                    device.vendor_id,
                    device.max_apdu,
                    device.segmentation
                );
                Some(device)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Rejected I-Am: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl ProtocolGateway for LocalGateway {
    async fn create_point(&self, point: &Point) -> GatewayResult<()> {
        if self.objects.contains_key(&point.identifier) {
            return Err(GatewayError::DuplicateObject(point.identifier));
        }

        self.objects.insert(
            point.identifier,
            ObjectEntry {
                object_name: point.name.clone(),
                units: point.units(),
                present_value: point.value.clone(),
            },
        );
        Ok(())
    }

    async fn set_present_value(
        &self,
        identifier: ObjectIdentifier,
        value: &PointValue,
    ) -> GatewayResult<()> {
        let mut entry = self
            .objects
            .get_mut(&identifier)
            .ok_or(GatewayError::UnknownObject(identifier))?;
        entry.present_value = value.clone();
        Ok(())
    }

    async fn announce_presence(&self) -> GatewayResult<()> {
        let iam = IAm::from(self.responder.lock().local());
        let count = self.announcements.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            device = %iam.device_identifier,
            source = %iam.source,
            count,
            "Announced I-Am"
        );
        Ok(())
    }
}
