pub mod frame;
pub mod pool;
pub mod slot;
pub mod source;
pub(crate) mod worker;

pub use frame::Frame;
pub use frame::PixelFormat;
pub use source::CameraSource;
