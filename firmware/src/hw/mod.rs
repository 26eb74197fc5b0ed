//! Board bindings for the core hardware traits.

pub mod camera;
pub mod power;
pub mod radio;

pub use camera::DvpCamera;
pub use power::RtcSleep;
pub use radio::WifiStation;
