//! libomt sender backend
//!
//! The library is resolved at runtime so the bridge still runs (decode-only,
//! fallback mode) on machines without it.

#![allow(non_snake_case)]

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use libloading::Library;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::sender::{OmtMediaFrame, OmtQuality, SendFailure, SenderBackend, SenderOutlet};
use crate::error::{BridgeError, Result};

const ADDRESS_CAPACITY: usize = 1024;

/// `OMTMediaFrame` as laid out by libomt
#[repr(C)]
struct RawMediaFrame {
    Type: c_int,
    Timestamp: i64,
    Codec: c_int,
    Width: c_int,
    Height: c_int,
    Stride: c_int,
    Flags: c_int,
    FrameRateN: c_int,
    FrameRateD: c_int,
    AspectRatio: f32,
    ColorSpace: c_int,
    SampleRate: c_int,
    Channels: c_int,
    SamplesPerChannel: c_int,
    Data: *mut c_void,
    DataLength: c_int,
    CompressedData: *mut c_void,
    CompressedLength: c_int,
    FrameMetadata: *mut c_void,
    FrameMetadataLength: c_int,
}

impl RawMediaFrame {
    fn from_frame(frame: &OmtMediaFrame<'_>) -> Self {
        Self {
            Type: frame.frame_type as c_int,
            Timestamp: frame.timestamp,
            Codec: frame.codec,
            Width: frame.width,
            Height: frame.height,
            Stride: frame.stride,
            Flags: 0,
            FrameRateN: frame.frame_rate_n,
            FrameRateD: frame.frame_rate_d,
            AspectRatio: frame.aspect_ratio,
            ColorSpace: frame.color_space,
            SampleRate: frame.sample_rate,
            Channels: frame.channels,
            SamplesPerChannel: frame.samples_per_channel,
            // libomt only reads from Data
            Data: frame.data.as_ptr() as *mut c_void,
            DataLength: frame.data.len() as c_int,
            CompressedData: ptr::null_mut(),
            CompressedLength: 0,
            FrameMetadata: ptr::null_mut(),
            FrameMetadataLength: 0,
        }
    }
}

type SendCreateFn = unsafe extern "C" fn(name: *const c_char, quality: c_int) -> *mut c_void;
type SendFn = unsafe extern "C" fn(instance: *mut c_void, frame: *mut RawMediaFrame) -> c_int;
type SendDestroyFn = unsafe extern "C" fn(instance: *mut c_void);
type SendGetAddressFn =
    unsafe extern "C" fn(instance: *mut c_void, address: *mut c_char, max_length: c_int) -> c_int;

/// Resolved entry points; the library stays loaded as long as this lives
struct LibOmtApi {
    send_create: SendCreateFn,
    send: SendFn,
    send_destroy: SendDestroyFn,
    send_getaddress: SendGetAddressFn,
    _library: Library,
}

impl LibOmtApi {
    fn load(path: &Path) -> Result<Self> {
        // SAFETY: loading runs the library's initialisers; libomt has no
        // load-time requirements beyond its own dependencies being present
        let library = unsafe { Library::new(path) }.map_err(|e| {
            BridgeError::SenderUnavailable(format!("cannot load {}: {}", path.display(), e))
        })?;

        // SAFETY: the signatures match libomt.h
        unsafe {
            let send_create = *library
                .get::<SendCreateFn>(b"omt_send_create\0")
                .map_err(missing_symbol)?;
            let send = *library.get::<SendFn>(b"omt_send\0").map_err(missing_symbol)?;
            let send_destroy = *library
                .get::<SendDestroyFn>(b"omt_send_destroy\0")
                .map_err(missing_symbol)?;
            let send_getaddress = *library
                .get::<SendGetAddressFn>(b"omt_send_getaddress\0")
                .map_err(missing_symbol)?;

            Ok(Self {
                send_create,
                send,
                send_destroy,
                send_getaddress,
                _library: library,
            })
        }
    }
}

fn missing_symbol(e: libloading::Error) -> BridgeError {
    BridgeError::SenderUnavailable(format!("libomt symbol missing: {}", e))
}

/// Sender backend backed by a dynamically loaded libomt
pub struct LibOmtBackend {
    path: PathBuf,
    api: Mutex<Option<Arc<LibOmtApi>>>,
}

impl LibOmtBackend {
    /// Nothing is loaded until the first `open` or `check_available`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            api: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn api(&self) -> Result<Arc<LibOmtApi>> {
        let mut guard = self.api.lock();
        if let Some(api) = guard.as_ref() {
            return Ok(api.clone());
        }
        let api = Arc::new(LibOmtApi::load(&self.path)?);
        info!("Loaded libomt from {}", self.path.display());
        *guard = Some(api.clone());
        Ok(api)
    }
}

impl SenderBackend for LibOmtBackend {
    fn open(&self, name: &str, quality: OmtQuality) -> Result<Box<dyn SenderOutlet>> {
        let api = self.api()?;
        let c_name = CString::new(name)
            .map_err(|_| BridgeError::Config(format!("source name contains NUL: {:?}", name)))?;

        // SAFETY: c_name outlives the call; libomt copies the name
        let instance = unsafe { (api.send_create)(c_name.as_ptr(), quality.as_raw()) };
        if instance.is_null() {
            return Err(BridgeError::SenderUnavailable(format!(
                "omt_send_create failed for '{}'",
                name
            )));
        }
        debug!("omt_send_create('{}', {}) ok", name, quality);

        Ok(Box::new(LibOmtOutlet { api, instance }))
    }

    fn check_available(&self) -> Result<()> {
        self.api().map(|_| ())
    }
}

/// One `omt_send_t` instance
struct LibOmtOutlet {
    api: Arc<LibOmtApi>,
    instance: *mut c_void,
}

// SAFETY: an omt_send_t may be used from any thread as long as calls on it
// are not concurrent; the outlet is only reachable through `&mut self`.
unsafe impl Send for LibOmtOutlet {}

impl SenderOutlet for LibOmtOutlet {
    fn send(&mut self, frame: &OmtMediaFrame<'_>) -> std::result::Result<(), SendFailure> {
        if self.instance.is_null() {
            return Err(SendFailure::Fatal("sender destroyed".to_string()));
        }
        let mut raw = RawMediaFrame::from_frame(frame);
        // SAFETY: instance is live and `raw` borrows frame data that outlives the call
        let result = unsafe { (self.api.send)(self.instance, &mut raw) };
        if result >= 0 {
            Ok(())
        } else {
            Err(SendFailure::Rejected(result))
        }
    }

    fn address(&self) -> Option<String> {
        if self.instance.is_null() {
            return None;
        }
        let mut buf = vec![0 as c_char; ADDRESS_CAPACITY];
        // SAFETY: buf holds ADDRESS_CAPACITY bytes and libomt NUL-terminates within it
        let len = unsafe {
            (self.api.send_getaddress)(self.instance, buf.as_mut_ptr(), ADDRESS_CAPACITY as c_int)
        };
        if len <= 0 {
            return None;
        }
        buf[ADDRESS_CAPACITY - 1] = 0;
        // SAFETY: buf is NUL-terminated
        let address = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Some(address.to_string_lossy().into_owned())
    }
}

impl Drop for LibOmtOutlet {
    fn drop(&mut self) {
        if !self.instance.is_null() {
            // SAFETY: instance came from omt_send_create and is destroyed once
            unsafe { (self.api.send_destroy)(self.instance) };
            self.instance = ptr::null_mut();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_is_sender_unavailable() {
        let backend = LibOmtBackend::new("/nonexistent/libomt-missing.so");
        assert!(matches!(
            backend.check_available(),
            Err(BridgeError::SenderUnavailable(_))
        ));
        assert!(matches!(
            backend.open("Camera 1", OmtQuality::Medium),
            Err(BridgeError::SenderUnavailable(_))
        ));
    }

    #[test]
    fn test_frame_layout_offsets() {
        // Timestamp is 8-byte aligned after the leading int
        assert_eq!(std::mem::offset_of!(RawMediaFrame, Timestamp), 8);
        assert_eq!(std::mem::offset_of!(RawMediaFrame, Codec), 16);
        assert_eq!(std::mem::offset_of!(RawMediaFrame, AspectRatio), 44);
    }
}
