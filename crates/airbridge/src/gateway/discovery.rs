//! Who-Is / I-Am policy
//!
//! Wire encoding belongs to the protocol stack; this module only decides
//! whether to answer a Who-Is and whether to accept an I-Am reply.

use super::types::{DiscoveredDevice, IAm, LocalDevice, ObjectType, WhoIs};

/// Reasons an inbound I-Am is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("I-Am from {address} carries non-device identifier {object_type}")]
    InvalidObjectType {
        address: String,
        object_type: ObjectType,
    },
}

/// Answers Who-Is for the local device and filters I-Am replies against
/// the last Who-Is we sent.
#[derive(Debug, Clone)]
pub struct DiscoveryResponder {
    local: LocalDevice,
    outstanding: Option<WhoIs>,
}

impl DiscoveryResponder {
    pub fn new(local: LocalDevice) -> Self {
        Self {
            local,
            outstanding: None,
        }
    }

    pub fn local(&self) -> &LocalDevice {
        &self.local
    }

    /// Our I-Am if the local instance falls within the request's range
    pub fn on_who_is(&self, request: &WhoIs) -> Option<IAm> {
        if request.contains(self.local.instance) {
            Some(IAm::from(&self.local))
        } else {
            None
        }
    }

    /// Remember an outgoing Who-Is so replies can be lined up with it
    pub fn record_who_is(&mut self, request: WhoIs) {
        self.outstanding = Some(request);
    }

    /// Evaluate an I-Am reply.
    ///
    /// Returns `Ok(None)` when no Who-Is is outstanding or the device lies
    /// outside the requested range.
    pub fn on_i_am(&self, reply: &IAm) -> Result<Option<DiscoveredDevice>, DiscoveryError> {
        let Some(request) = self.outstanding else {
            return Ok(None);
        };

        let identifier = reply.device_identifier;
        if identifier.object_type != ObjectType::Device {
            return Err(DiscoveryError::InvalidObjectType {
                address: reply.source.clone(),
                object_type: identifier.object_type,
            });
        }

        if !request.contains(identifier.instance) {
            return Ok(None);
        }

        Ok(Some(DiscoveredDevice {
            device_id: identifier.instance,
            address: reply.source.clone(),
            max_apdu: reply.max_apdu_length_accepted,
            vendor_id: reply.vendor_id,
            segmentation: reply.segmentation_supported,
        }))
    }
}
