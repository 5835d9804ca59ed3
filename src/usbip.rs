// ABOUTME: Minimal USB/IP envelope and URB surface consumed by the dispatcher
// ABOUTME: field names and semantics follow the stub-side USB/IP wire structures this filter sits behind

/// `direction` on the USB/IP envelope and the pipe: into the device
/// (OUT, client->device) or out of it (IN, device->client).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

/// Transfer type encoded in a URB's pipe. Only `Bulk` is interpreted by
/// this filter; everything else is passed straight through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeType {
    Control,
    Bulk,
    Interrupt,
    Isochronous,
}

/// The USB/IP command carried by an envelope. Only `Submit` is
/// interpreted; `Unlink` is passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbIpCommand {
    Submit,
    Unlink,
}

/// Fields of the USB/IP request envelope this filter reads.
#[derive(Debug, Clone, Copy)]
pub struct UsbIpEnvelope {
    pub command: UsbIpCommand,
    pub seqnum: u32,
    pub devid: u32,
    pub direction: Direction,
    /// endpoint number; used by the caller to look up `wMaxPacketSize`.
    pub ep: u8,
}

/// Opaque handle to a client or injected URB. The filter never owns
/// client URBs outright (they are borrowed under the stub's own lock);
/// this handle is just enough to look a carrier back up in `free_list`
/// or `busy_queue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UrbHandle(pub u64);

/// What a dispatcher call decided to do with a URB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrbOutcome {
    /// Not ours to touch; the stub should process it normally.
    PassThrough,
    /// The filter completed the URB itself.
    CompletedLocally { status: i32, actual_length: u32 },
    /// The filter has taken ownership (queued it); the stub must not
    /// touch it until a later callback hands it back.
    Owned,
}

/// Pipe descriptor: direction, endpoint, and transfer type, as decoded
/// from a URB's `pipe` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipe {
    pub direction: Direction,
    pub endpoint: u8,
    pub kind: PipeType,
}

impl Pipe {
    pub fn is_bulk(&self) -> bool {
        self.kind == PipeType::Bulk
    }
}

/// The fields of a URB this filter reads or overwrites. `transfer_buffer`
/// is owned by the caller for the duration of the call; the filter never
/// retains a reference past it.
pub struct Urb<'a> {
    pub pipe: Pipe,
    pub transfer_buffer: &'a mut [u8],
    pub transfer_buffer_length: u32,
    pub actual_length: u32,
    pub status: i32,
    pub handle: UrbHandle,
}

impl<'a> Urb<'a> {
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}
