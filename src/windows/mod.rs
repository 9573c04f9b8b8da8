mod wide;
mod wm;

use crate::detect::{DeviceInfo, EventInfo, EventType, Queue};
use futures::Stream;
use parking_lot::Mutex;
use serialport::SerialPortType;
use std::{
    collections::HashMap,
    ffi::OsString,
    fmt::{self, Debug},
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    thread::JoinHandle,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{error, trace};
use wide::to_wide;
use windows_sys::Win32::UI::WindowsAndMessaging::{FindWindowW, PostMessageW, WM_CLOSE};

/// Stops the background message-loop thread started by [`listen`]. The
/// thread is also stopped if the handle is dropped without calling
/// [`AbortHandle::abort`].
pub struct AbortHandle {
    window: OsString,
    join_handle: Option<JoinHandle<io::Result<()>>>,
}

impl Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle").field("window", &self.window).finish()
    }
}

impl AbortHandle {
    /// Signal the notification window to close and wait for its thread.
    pub fn abort(mut self) {
        self.close();
    }

    fn close(&mut self) {
        let Some(jh) = self.join_handle.take() else {
            return;
        };
        let wide = to_wide(&self.window);
        let hwnd = unsafe {
            let result = FindWindowW(wm::WINDOW_CLASS_NAME, wide.as_ptr());
            if result.is_null() {
                error!(error = ?io::Error::last_os_error(), "failed to find notification window to abort");
                return;
            }
            result
        };
        match unsafe { PostMessageW(hwnd as _, WM_CLOSE, 0, 0) } {
            0 => error!(error = ?io::Error::last_os_error(), "failed to post close message"),
            _ => match jh.join() {
                Ok(Ok(())) => trace!("device detection closed"),
                Ok(Err(error)) => error!(?error, "device detection loop error"),
                Err(error) => error!(?error, "device detection close error"),
            },
        }
    }
}

impl Drop for AbortHandle {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) struct IterState {
    pub(crate) cache: Mutex<HashMap<String, DeviceInfo>>,
    pub(crate) queue: Queue,
}

/// An event emitter to listen for Usb Add Remove events
pub struct EventIter {
    pub(crate) state: Arc<IterState>,
}

impl Debug for EventIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventIter").finish()
    }
}

impl Stream for EventIter {
    type Item = io::Result<EventInfo>;
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.state.queue.poll_next(cx)
    }
}

pub(crate) fn listen() -> io::Result<(AbortHandle, EventIter)> {
    // A unique window name, so two listeners in the same process (e.g. tests)
    // don't collide on `FindWindowW`.
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.subsec_nanos())
        .unwrap_or(18825437)
        .to_string();
    let window = OsString::from(format!("SERIALOSC_DEVICE_NOTIFIER_{nanos}"));
    let name = window.clone();

    let state = Arc::new(IterState {
        cache: Mutex::new(scan()?),
        queue: Queue::new(),
    });
    let theirs = Arc::clone(&state);
    let jh = std::thread::spawn(move || unsafe {
        wm::window_dispatcher(name, Arc::into_raw(theirs) as _)
    });

    let abort_handle = AbortHandle {
        window,
        join_handle: Some(jh),
    };
    Ok((abort_handle, EventIter { state }))
}

pub(crate) fn scan_devices() -> io::Result<HashMap<String, EventInfo>> {
    Ok(scan()?
        .into_iter()
        .map(|(port, meta)| {
            let info = EventInfo {
                meta,
                port: port.clone(),
                event: EventType::Add,
            };
            (port, info)
        })
        .collect())
}

pub fn scan() -> io::Result<HashMap<String, DeviceInfo>> {
    let devices = serialport::available_ports()?
        .into_iter()
        .filter_map(|info| match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let port = info.port_name;
                let meta = DeviceInfo {
                    vid: Some(format!("{:04X}", usb.vid)),
                    pid: Some(format!("{:04X}", usb.pid)),
                    serial: usb.serial_number,
                    manufacturer: usb.manufacturer,
                    product: usb.product,
                };
                Some((port, meta))
            }
            _ => None,
        })
        .collect::<HashMap<String, _>>();
    Ok(devices)
}

pub(crate) fn event_for(port: String, meta: DeviceInfo, event: EventType) -> EventInfo {
    EventInfo { port, meta, event }
}
