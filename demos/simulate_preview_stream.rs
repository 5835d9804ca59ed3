// ABOUTME: Drives a Filter through one preview stream round trip against an in-process fake camera
// ABOUTME: useful for eyeballing state transitions and frame delivery without a real USB/IP stub

use argh::FromArgs;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use usbip_ptp_filter::config::FilterConfig;
use usbip_ptp_filter::container::{ContainerType, RESPONSE_CODE_OK};
use usbip_ptp_filter::device::{DeviceTable, CANON_GET_VIEW_FINDER_DATA};
use usbip_ptp_filter::usbip::{Direction, Pipe, PipeType, Urb, UrbHandle, UsbIpCommand, UsbIpEnvelope};
use usbip_ptp_filter::Filter;

const CANON_VENDOR: u16 = 0x04a9;
const CANON_PRODUCT: u16 = 0x323b;

/// Simulate a client requesting a Canon preview stream and the device
/// serving back one synthesized frame, printing the filter's state after
/// every step.
#[derive(FromArgs)]
struct CliArgs {
    /// whether to enable trace-level logging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// how many preview frames to serve before closing the session
    #[argh(option, short = 'n', default = "3")]
    frames: u32,

    /// bytes of synthetic viewfinder payload per frame
    #[argh(option, default = "256")]
    payload_len: usize,
}

fn header_bytes(length: u32, kind: u16, code: u16, trans_id: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(length as usize);
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&code.to_le_bytes());
    out.extend_from_slice(&trans_id.to_le_bytes());
    out.resize(length.max(12) as usize, 0x00);
    out
}

fn out_envelope() -> UsbIpEnvelope {
    UsbIpEnvelope {
        command: UsbIpCommand::Submit,
        seqnum: 1,
        devid: 1,
        direction: Direction::Out,
        ep: 1,
    }
}

fn in_envelope() -> UsbIpEnvelope {
    UsbIpEnvelope {
        command: UsbIpCommand::Submit,
        seqnum: 2,
        devid: 1,
        direction: Direction::In,
        ep: 0x81,
    }
}

fn bulk_pipe(direction: Direction) -> Pipe {
    Pipe {
        direction,
        endpoint: 1,
        kind: PipeType::Bulk,
    }
}

fn urb(buf: &mut [u8], direction: Direction, handle: u64) -> Urb<'_> {
    let len = buf.len() as u32;
    Urb {
        pipe: bulk_pipe(direction),
        transfer_buffer: buf,
        transfer_buffer_length: len,
        actual_length: len,
        status: 0,
        handle: UrbHandle(handle),
    }
}

/// Sends the client's `GetViewFinderData` command and plays the fake
/// device's data+response pair back through `on_tx`, then serves the
/// finished frame back out through `on_rx`.
fn drive_one_frame(filter: &Filter, payload_len: usize, trans_id: u32, next_handle: &mut u64) {
    let mut command = header_bytes(12, ContainerType::Command as u16, CANON_GET_VIEW_FINDER_DATA, trans_id);
    let mut command_urb = urb(&mut command, Direction::Out, *next_handle);
    *next_handle += 1;
    filter.on_rx(out_envelope(), &mut command_urb);
    println!("client command -> state {:?}", filter.state());

    let handle = match filter.take_pending_injection() {
        Some((handle, _submitted)) => handle,
        None => {
            // Pretend enough wall-clock time has passed for the scheduler's
            // next deadline to be owed; a real stub polls `tick` from its
            // own timer instead of forcing this.
            let now = std::time::Instant::now() + std::time::Duration::from_millis(110);
            filter
                .tick(now)
                .map(|(handle, _)| handle)
                .expect("scheduler should be armed once the stream is active")
        }
    };

    let data_len = 12 + payload_len as u32;
    let mut data_pdu = header_bytes(data_len, ContainerType::Data as u16, CANON_GET_VIEW_FINDER_DATA, 1);
    let mut data_urb = urb(&mut data_pdu, Direction::In, handle.0);
    filter.on_tx(&mut data_urb);

    let mut response_pdu = header_bytes(12, ContainerType::Response as u16, RESPONSE_CODE_OK, 1);
    let mut response_urb = urb(&mut response_pdu, Direction::In, handle.0);
    filter.on_tx(&mut response_urb);
    println!(
        "device frame injected -> state {:?}, buffered frames {}",
        filter.state(),
        filter.frame_count()
    );

    let mut served_data = vec![0u8; data_len as usize];
    let mut served_data_urb = urb(&mut served_data, Direction::In, *next_handle);
    *next_handle += 1;
    filter.on_rx(in_envelope(), &mut served_data_urb);

    let mut served_response = vec![0u8; 12];
    let mut served_response_urb = urb(&mut served_response, Direction::In, *next_handle);
    *next_handle += 1;
    filter.on_rx(in_envelope(), &mut served_response_urb);
    println!(
        "frame served to client -> state {:?}, buffered frames {}",
        filter.state(),
        filter.frame_count()
    );
}

fn main() {
    let cli_args: CliArgs = argh::from_env();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli_args.debugging { Level::TRACE } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let table = DeviceTable::new();
    let filter = Filter::probe(&table, CANON_VENDOR, CANON_PRODUCT, FilterConfig::default())
        .expect("Canon EOS 650D is in the built-in table");

    filter.set_observer(|event| println!("event: {event:?}"));

    let mut next_handle = 100u64;
    for frame in 0..cli_args.frames {
        println!("-- frame {frame} --");
        drive_one_frame(&filter, cli_args.payload_len, 0x30 + frame, &mut next_handle);
    }

    let mut close_cmd = header_bytes(12, ContainerType::Command as u16, 0x1003, 0xff);
    let mut close_urb = urb(&mut close_cmd, Direction::Out, next_handle);
    filter.on_rx(out_envelope(), &mut close_urb);
    println!("session closed -> state {:?}", filter.state());
}
