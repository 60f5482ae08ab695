//! Cloud API port: device list and bulk quota fetches.

use std::future::Future;

use efbridge_domain::device::{DeviceInfo, DeviceSn};
use efbridge_domain::error::BridgeError;
use efbridge_domain::payload::RawMessage;

/// Read access to the vendor cloud.
///
/// Implementations live in adapter crates (e.g. `adapter_cloud_http`).
pub trait CloudApi: Send + Sync {
    /// Every device registered to the account, with its online flag.
    fn fetch_all_devices(
        &self,
    ) -> impl Future<Output = Result<Vec<DeviceInfo>, BridgeError>> + Send;

    /// Full parameter snapshot of one device, in the bulk-quota shape
    /// `{code, message, data}`.
    fn fetch_quota_all(
        &self,
        sn: &DeviceSn,
    ) -> impl Future<Output = Result<RawMessage, BridgeError>> + Send;
}

impl<T: CloudApi> CloudApi for std::sync::Arc<T> {
    fn fetch_all_devices(
        &self,
    ) -> impl Future<Output = Result<Vec<DeviceInfo>, BridgeError>> + Send {
        (**self).fetch_all_devices()
    }

    fn fetch_quota_all(
        &self,
        sn: &DeviceSn,
    ) -> impl Future<Output = Result<RawMessage, BridgeError>> + Send {
        (**self).fetch_quota_all(sn)
    }
}
