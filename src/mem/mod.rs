pub mod device;
pub mod lane;

pub use device::DeviceModel;
pub use lane::{LaneConfig, TimedLane};

pub type Cycle = u64;

/// The two backing timing models the controller drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceId {
    /// Fast volatile cache medium (DRAM-like).
    CacheMedium,
    /// Slow nonvolatile backing store (flash/PCM-like).
    BackingStore,
}

/// One single-address sub-transaction handed to a device.
#[derive(Debug, Clone, Copy)]
pub struct DeviceRequest {
    pub is_write: bool,
    pub addr: u64,
    pub bytes: u64,
    /// Ask the device to report early availability of this burst. Only
    /// meaningful for reads on devices that support critical-word delivery.
    pub critical_word: bool,
}

impl DeviceRequest {
    pub fn read(addr: u64, bytes: u64) -> Self {
        Self {
            is_write: false,
            addr,
            bytes,
            critical_word: false,
        }
    }

    pub fn write(addr: u64, bytes: u64) -> Self {
        Self {
            is_write: true,
            addr,
            bytes,
            critical_word: false,
        }
    }

    pub fn with_critical_word(mut self) -> Self {
        self.critical_word = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEventKind {
    ReadDone,
    WriteDone,
    /// Fired before ReadDone for a request enqueued with `critical_word`,
    /// at most once per accepted request.
    CriticalWord,
}

/// Completion event raised by a device, drained by the scheduling loop.
#[derive(Debug, Clone, Copy)]
pub struct DeviceEvent {
    pub device: DeviceId,
    pub kind: DeviceEventKind,
    pub addr: u64,
    pub cycle: Cycle,
}

/// Contract both backing devices implement. `try_enqueue` is non-blocking and
/// the caller must retry rejected requests on a later cycle; `tick` advances
/// the device by one cycle and appends any events it raises.
pub trait MemoryDevice {
    fn id(&self) -> DeviceId;
    fn try_enqueue(&mut self, request: DeviceRequest) -> bool;
    fn tick(&mut self, events: &mut Vec<DeviceEvent>);
}
