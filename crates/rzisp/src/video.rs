//! The wrapped video-capture queue.
//!
//! The shim intercepts the capture device's ioctl surface; everything it
//! does not inject side effects into is forwarded to an implementation of
//! [`VideoQueue`]. The trait speaks the same errno convention as the
//! surface it stands in for: `Err` carries a negative errno value.

/// Errno-style result at the capture-queue boundary.
pub type VqResult<T> = Result<T, i32>;

/// FourCC codes of the output pixel formats the shim accepts.
pub mod fourcc {
    pub const YUYV: u32 = u32::from_le_bytes(*b"YUYV");
    pub const UYVY: u32 = u32::from_le_bytes(*b"UYVY");
    pub const RGB24: u32 = u32::from_le_bytes(*b"RGB3");
    pub const ARGB32: u32 = u32::from_le_bytes(*b"BA24");
    pub const XRGB32: u32 = u32::from_le_bytes(*b"BX24");

    pub const SRGGB8: u32 = u32::from_le_bytes(*b"RGGB");
    pub const SRGGB10: u32 = u32::from_le_bytes(*b"RG10");
    pub const SRGGB12: u32 = u32::from_le_bytes(*b"RG12");
}

/// Device identity reported by `querycap`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capability {
    pub driver: String,
    pub card: String,
}

/// Negotiated pixel format of the capture queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PixFormat {
    pub pixelformat: u32,
    pub width: u16,
    pub height: u16,
}

/// Crop/compose rectangle passthrough.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

/// The underlying capture queue the shim forwards into.
pub trait VideoQueue {
    fn querycap(&mut self) -> VqResult<Capability>;
    fn try_fmt(&mut self, fmt: &mut PixFormat) -> VqResult<()>;
    fn g_fmt(&mut self) -> VqResult<PixFormat>;
    fn s_fmt(&mut self, fmt: &mut PixFormat) -> VqResult<()>;
    fn enum_fmt(&mut self, index: u32) -> VqResult<u32>;
    fn g_selection(&mut self, sel: &mut Selection) -> VqResult<()>;
    fn s_selection(&mut self, sel: &mut Selection) -> VqResult<()>;
    fn enuminput(&mut self, index: u32) -> VqResult<String>;
    fn g_input(&mut self) -> VqResult<u32>;
    fn s_input(&mut self, input: u32) -> VqResult<()>;
    fn reqbufs(&mut self, count: u32) -> VqResult<u32>;
    fn create_bufs(&mut self, count: u32) -> VqResult<u32>;
    fn querybuf(&mut self, index: u32) -> VqResult<()>;
    fn qbuf(&mut self, index: u32) -> VqResult<()>;
    /// Dequeue the next finished buffer, returning its index.
    fn dqbuf(&mut self) -> VqResult<u32>;
    fn expbuf(&mut self, index: u32) -> VqResult<()>;
    fn prepare_buf(&mut self, index: u32) -> VqResult<()>;
    fn streamon(&mut self) -> VqResult<()>;
    fn streamoff(&mut self) -> VqResult<()>;
    fn log_status(&mut self) -> VqResult<()> {
        Ok(())
    }
    fn subscribe_event(&mut self, event: u32) -> VqResult<()>;
    fn unsubscribe_event(&mut self, event: u32) -> VqResult<()>;
    /// Non-vendor control passthrough.
    fn s_ctrl(&mut self, id: u32, value: i32) -> VqResult<()>;
    /// Program the raw source pixel format on the receiver side.
    fn set_source_format(&mut self, fourcc: u32);
}
