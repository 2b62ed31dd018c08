pub mod consumer;
pub mod online;
pub mod provider;
pub mod pusher;
pub mod registration;
pub mod service;
pub mod types;

pub use consumer::{Consumer, EventDispatcher, ProcessResult};
pub use online::{OnlineDelivery, OnlinePusher, SessionRegistry};
pub use provider::{OfflinePushProvider, OfflinePushers};
pub use pusher::Pusher;
pub use registration::{DeviceRegistration, MemoryRegistrationStore, RegistrationStore};
pub use service::PushRpcService;
pub use types::{
    DeliveryOutcome, MessageEvent, OfflineNotification, PushOptions, PushReport, PushTarget,
    PushVendor, RecipientSelector,
};
