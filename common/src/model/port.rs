use serde::{Deserialize, Serialize};

use crate::ids::{PortId, ServiceId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub id: PortId,
    pub service_id: ServiceId,
    /// `None` means HTTP-only: the service is reached exclusively through URL routes.
    pub host_port: Option<u16>,
    pub forwarded_port: u16,
}

impl PortMapping {
    pub fn is_http_only(&self) -> bool {
        self.host_port.is_none()
    }
}
