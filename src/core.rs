// ABOUTME: FilterCore ties C1-C5 together behind one mutex; Filter is the public handle the stub holds per device
// ABOUTME: every public method locks once, does its work, and returns without calling back into the stub

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use tracing::{info, warn};

use crate::buffer::{BackpressureAction, FrameBuffer};
use crate::config::FilterConfig;
use crate::container::{ContainerType, PduHeader, RESPONSE_CODE_OK};
use crate::device::{DeviceModel, DeviceTable};
use crate::dispatcher::{self, Classification};
use crate::error::FilterError;
use crate::parser::{ParserRole, PduParser, StepOutcome};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::state::{FilterState, Trigger};
use crate::transaction::TransactionIdRewriter;
use crate::usbip::{Direction, Urb, UrbHandle, UrbOutcome, UsbIpEnvelope};

/// Typical high-speed bulk `wMaxPacketSize`. Endpoint descriptor lookup
/// is the stub's job (out of scope, §6); this is the quantum used to
/// round [`FrameBuffer::reserve_write`] windows.
const BULK_TRANSFER_QUANTUM: usize = 512;

const PRE_ALLOCATED_CARRIERS: usize = 2;

/// Structured events mirroring `tracing` output, for embedders that want
/// counters without parsing logs.
#[derive(Debug, Clone)]
pub enum FilterEvent {
    StateChanged { from: FilterState, to: FilterState },
    Bypassed { reason: FilterError },
    FrameDropped,
    FrameServed,
}

type Observer = dyn Fn(FilterEvent) + Send + Sync;

/// Everything one attached device's filter instance owns.
pub struct FilterCore {
    state: FilterState,
    config: FilterConfig,
    model: DeviceModel,
    rewriter: TransactionIdRewriter,
    rx: PduParser,
    tx: PduParser,
    self_parser: PduParser,
    send: PduParser,
    buffer: FrameBuffer,
    scheduler: Scheduler,
    trigger: Option<Vec<u8>>,
    /// set once a client preview command has been accepted and its IN
    /// data-phase request is outstanding.
    pending_serve: bool,
    serving_remaining: u32,
    serving_is_response: bool,
    free_carriers: usize,
    busy_carriers: HashSet<UrbHandle>,
    next_handle: u64,
    /// an injected command the caller must submit right away, produced by
    /// the very first preview request out of `Idle` rather than waiting
    /// for the next scheduler tick.
    pending_injection: Option<(UrbHandle, Vec<u8>)>,
    /// client non-preview OUT commands deferred while an injected
    /// transaction is in flight or draining (`Busy`/`Drop`). Drained one
    /// at a time as soon as the filter returns to a state that can admit
    /// a client transaction.
    request_queue: VecDeque<Vec<u8>>,
    /// a queued command just admitted; the caller must resubmit it.
    pending_request: Option<Vec<u8>>,
    observer: Option<Box<Observer>>,
}

impl FilterCore {
    fn new(model: DeviceModel, config: FilterConfig) -> Self {
        FilterCore {
            state: FilterState::Init,
            buffer: FrameBuffer::new(config.max_buffer_bytes(), config.align_shift()),
            scheduler: Scheduler::new(if config.preview_enabled() {
                SchedulerConfig::from_fps(config.fps())
            } else {
                SchedulerConfig::disabled()
            }),
            config,
            model,
            rewriter: TransactionIdRewriter::new(),
            rx: PduParser::new(),
            tx: PduParser::new(),
            self_parser: PduParser::new(),
            send: PduParser::new(),
            trigger: None,
            pending_serve: false,
            serving_remaining: 0,
            serving_is_response: false,
            free_carriers: PRE_ALLOCATED_CARRIERS,
            busy_carriers: HashSet::new(),
            next_handle: 1,
            pending_injection: None,
            request_queue: VecDeque::new(),
            pending_request: None,
            observer: None,
        }
    }

    /// Pop a free carrier, stamp `trigger` with the current trans_id, and
    /// mark it busy. Returns `None` if no carrier is free.
    fn submit_injection(&mut self) -> Option<(UrbHandle, Vec<u8>)> {
        if self.free_carriers == 0 {
            warn!("no free carrier for preview submission, skipping");
            return None;
        }
        let mut payload = self.trigger.clone()?;
        let _ = self.send.step(&mut payload, &mut self.rewriter, ParserRole::Send);

        self.free_carriers -= 1;
        let handle = UrbHandle(self.next_handle);
        self.next_handle += 1;
        self.busy_carriers.insert(handle);
        self.buffer.begin_frame();
        Some((handle, payload))
    }

    fn emit(&self, event: FilterEvent) {
        if let Some(observer) = &self.observer {
            observer(event);
        }
    }

    fn transition(&mut self, trigger: Trigger) {
        let from = self.state;
        let to = from.apply(trigger);
        if to != from {
            self.state = to;
            self.scheduler.on_state_armed(to.scheduler_armed(), Instant::now());
            self.emit(FilterEvent::StateChanged { from, to });
        }
    }

    fn fault(&mut self, error: FilterError) {
        warn!(error = %error, "filter fault, bypassing");
        self.trigger = None;
        self.pending_serve = false;
        self.request_queue.clear();
        self.pending_request = None;
        self.transition(Trigger::Fault);
        self.emit(FilterEvent::Bypassed { reason: error });
    }

    fn reset_session(&mut self) {
        self.rewriter.reset();
        self.trigger = None;
        self.pending_serve = false;
        self.busy_carriers.clear();
        self.free_carriers = PRE_ALLOCATED_CARRIERS;
        self.request_queue.clear();
        self.pending_request = None;
        self.transition(Trigger::SessionReset);
    }

    // -- C5: probe / remove -------------------------------------------------

    pub fn probe(table: &DeviceTable, vendor_id: u16, product_id: u16, config: FilterConfig) -> Option<Self> {
        let model = *table.lookup(vendor_id, product_id)?;
        info!(model = model.name, "filter probed and matched");
        let mut core = FilterCore::new(model, config);
        core.transition(Trigger::NonPreviewCommandRecognized);
        Some(core)
    }

    pub fn remove(&mut self) {
        self.trigger = None;
        self.pending_serve = false;
        self.busy_carriers.clear();
        self.request_queue.clear();
        self.pending_request = None;
        self.scheduler.on_state_armed(false, Instant::now());
    }

    // -- C5: on_rx ------------------------------------------------------------

    pub fn on_rx(&mut self, envelope: UsbIpEnvelope, urb: &mut Urb) -> UrbOutcome {
        if self.state.is_bypassed() || !urb.pipe.is_bulk() {
            return UrbOutcome::PassThrough;
        }
        match envelope.direction {
            Direction::Out => self.on_client_out(urb),
            Direction::In => self.on_client_in(urb),
        }
    }

    fn on_client_out(&mut self, urb: &mut Urb) -> UrbOutcome {
        let step = self.rx.step(urb.transfer_buffer, &mut self.rewriter, ParserRole::Rx);
        let header = match step {
            Err(e) => {
                self.fault(e);
                return UrbOutcome::PassThrough;
            }
            Ok(StepOutcome::Continue) => return UrbOutcome::PassThrough,
            Ok(StepOutcome::Done(header)) => header,
        };
        if header.kind != ContainerType::Command {
            return UrbOutcome::PassThrough;
        }
        match dispatcher::classify(&header, self.model.preview_opcode) {
            Classification::OpenSession => {
                self.reset_session();
                UrbOutcome::PassThrough
            }
            Classification::CloseSession => {
                self.reset_session();
                UrbOutcome::PassThrough
            }
            Classification::Preview => self.on_client_preview_command(urb),
            Classification::Other => match self.state {
                FilterState::Idle | FilterState::Active | FilterState::Sleep => {
                    self.transition(Trigger::ClientNonPreviewCommand);
                    UrbOutcome::PassThrough
                }
                // An injected transaction is in flight or still draining;
                // at most one PTP transaction may be on the wire at a
                // time, so this command waits its turn.
                FilterState::Busy | FilterState::Drop => {
                    self.request_queue.push_back(urb.transfer_buffer.to_vec());
                    UrbOutcome::Owned
                }
                // Command/Wait/SleepWait/Init: a client command arrived
                // while another client command was already in flight, or
                // before the device was ever recognized. Never modeled as
                // a valid edge in the transition table.
                _ => {
                    self.fault(FilterError::UnexpectedState);
                    UrbOutcome::PassThrough
                }
            },
        }
    }

    /// Admit one deferred command once the filter returns to a state that
    /// can hold a client transaction. Mirrors the `Idle`/`Active`/`Sleep`
    /// arm of [`Self::on_client_out`]'s `Classification::Other` handling,
    /// since a drained command is dispatched exactly as if it had just
    /// arrived.
    fn drain_request_queue(&mut self) {
        if !matches!(self.state, FilterState::Idle | FilterState::Active | FilterState::Sleep) {
            return;
        }
        if let Some(bytes) = self.request_queue.pop_front() {
            self.transition(Trigger::ClientNonPreviewCommand);
            self.pending_request = Some(bytes);
        }
    }

    fn on_client_preview_command(&mut self, urb: &Urb) -> UrbOutcome {
        match self.state {
            FilterState::Idle => {
                self.trigger = Some(urb.transfer_buffer.to_vec());
                self.pending_serve = true;
                self.pending_injection = self.submit_injection();
                self.transition(Trigger::ClientPreviewCommand);
            }
            FilterState::Active | FilterState::Sleep => {
                self.trigger = Some(urb.transfer_buffer.to_vec());
                self.pending_serve = true;
                self.transition(Trigger::ClientPreviewCommand);
            }
            _ => return UrbOutcome::PassThrough,
        }
        UrbOutcome::CompletedLocally {
            status: 0,
            actual_length: urb.transfer_buffer_length,
        }
    }

    fn on_client_in(&mut self, urb: &mut Urb) -> UrbOutcome {
        if !self.pending_serve {
            return UrbOutcome::PassThrough;
        }
        if self.serving_remaining == 0 {
            let header = match self.buffer.peek_header() {
                Some(h) => h,
                None => return UrbOutcome::PassThrough,
            };
            self.serving_remaining = header.length;
            self.serving_is_response = header.kind == ContainerType::Response;
        }
        let n = self
            .buffer
            .read(urb.transfer_buffer, &mut self.serving_remaining, self.serving_is_response);
        if n == 0 {
            return UrbOutcome::PassThrough;
        }
        let frame_done = self.serving_remaining == 0 && self.serving_is_response;
        if frame_done {
            self.pending_serve = false;
            self.emit(FilterEvent::FrameServed);
        }
        UrbOutcome::CompletedLocally {
            status: 0,
            actual_length: n as u32,
        }
    }

    // -- C5: on_tx ------------------------------------------------------------

    pub fn on_tx(&mut self, urb: &mut Urb) -> UrbOutcome {
        if self.state.is_bypassed() || !urb.pipe.is_bulk() {
            return UrbOutcome::PassThrough;
        }
        match urb.pipe.direction {
            Direction::Out => {
                let _ = self.send.step(urb.transfer_buffer, &mut self.rewriter, ParserRole::Send);
                UrbOutcome::PassThrough
            }
            Direction::In => self.on_device_in(urb),
        }
    }

    fn on_device_in(&mut self, urb: &mut Urb) -> UrbOutcome {
        let is_injected = self.busy_carriers.contains(&urb.handle);
        let role = if is_injected { ParserRole::SelfRole } else { ParserRole::Tx };
        let step = if is_injected {
            self.self_parser.step(urb.transfer_buffer, &mut self.rewriter, role)
        } else {
            self.tx.step(urb.transfer_buffer, &mut self.rewriter, role)
        };
        match step {
            Err(e) => {
                self.fault(e);
                UrbOutcome::PassThrough
            }
            Ok(StepOutcome::Continue) => {
                if is_injected {
                    self.write_injected_chunk(urb, false, false);
                }
                UrbOutcome::PassThrough
            }
            Ok(StepOutcome::Done(header)) => {
                if is_injected {
                    self.on_injected_pdu_done(header, urb)
                } else {
                    self.on_client_response_done(header)
                }
            }
        }
    }

    fn on_client_response_done(&mut self, header: PduHeader) -> UrbOutcome {
        if header.kind == ContainerType::Response {
            match self.state {
                FilterState::Command | FilterState::Wait | FilterState::SleepWait => {
                    self.transition(Trigger::ClientResponseComplete);
                    self.drain_request_queue();
                }
                _ => {}
            }
        }
        UrbOutcome::PassThrough
    }

    fn on_injected_pdu_done(&mut self, header: PduHeader, urb: &mut Urb) -> UrbOutcome {
        let is_response = header.kind == ContainerType::Response;
        self.write_injected_chunk(urb, true, is_response);
        if !is_response {
            return UrbOutcome::PassThrough;
        }

        self.busy_carriers.remove(&urb.handle);
        self.free_carriers += 1;

        if self.state == FilterState::Drop {
            // This carrier was already marked for discard; the device has
            // now finished draining it. Nothing more to inspect.
            self.transition(Trigger::DropDrained);
            self.drain_request_queue();
            return UrbOutcome::PassThrough;
        }

        let device_ok = urb.is_ok();
        let protocol_ok = header.code == RESPONSE_CODE_OK;
        let under_limit = self.buffer.frame_count() < self.config.buffer_count();

        if device_ok && protocol_ok && under_limit {
            self.transition(Trigger::InjectedFrameAccepted);
            self.drain_request_queue();
        } else {
            if !device_ok {
                warn!(status = ?urb.status, "injected preview device error");
            }
            self.transition(Trigger::InjectedFrameRejected);
        }
        UrbOutcome::PassThrough
    }

    fn write_injected_chunk(&mut self, urb: &Urb, end_of_pdu: bool, is_response: bool) {
        if self.state == FilterState::Drop {
            return;
        }
        let len = urb.transfer_buffer.len();
        match self.buffer.reserve_write(len, BULK_TRANSFER_QUANTUM) {
            Some(_) => {
                self.buffer.write(urb.transfer_buffer);
                self.buffer.commit_write(len, end_of_pdu);
                if end_of_pdu && is_response {
                    self.buffer.complete_frame();
                }
            }
            None => {
                let serving_active = self.pending_serve;
                match self.buffer.backpressure_action(serving_active, BULK_TRANSFER_QUANTUM) {
                    BackpressureAction::WaitForConsumer => {
                        self.transition(Trigger::InjectedFrameRejected);
                    }
                    BackpressureAction::EnterDrop { rollback_previous } => {
                        self.buffer.enter_drop(rollback_previous);
                        self.emit(FilterEvent::FrameDropped);
                        self.transition(Trigger::BufferBackpressure);
                    }
                }
            }
        }
    }

    // -- C4: scheduler ----------------------------------------------------

    /// Poll the scheduler; if a preview tick is due, returns the carrier
    /// and trans-id-stamped command bytes the caller should submit as a
    /// new OUT URB.
    pub fn tick(&mut self, now: Instant) -> Option<(UrbHandle, Vec<u8>)> {
        if !self.scheduler.due(now) {
            return None;
        }
        let submission = self.submit_injection();
        if submission.is_some() {
            self.scheduler.mark_fired(now);
            self.transition(Trigger::SchedulerSubmitted);
        }
        submission
    }

    /// Drain an injection that was queued synchronously by the first
    /// preview request out of `Idle` (see [`Self::on_client_preview_command`]).
    pub fn take_pending_injection(&mut self) -> Option<(UrbHandle, Vec<u8>)> {
        self.pending_injection.take()
    }

    /// Drain a command just admitted from `request_queue` by
    /// [`Self::drain_request_queue`]. The caller must resubmit these bytes
    /// as a new client OUT URB.
    pub fn take_queued_request(&mut self) -> Option<Vec<u8>> {
        self.pending_request.take()
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    pub fn frame_count(&self) -> usize {
        self.buffer.frame_count()
    }
}

/// Shared, lockable handle to one attached device's filter instance. This
/// is the type the enclosing stub actually holds; every method locks
/// [`FilterCore`] once and releases it before returning, so it is always
/// safe to call from a completion context as long as the caller never
/// calls back into the stub while still holding the returned value.
pub struct Filter(Mutex<FilterCore>);

impl Filter {
    pub fn probe(table: &DeviceTable, vendor_id: u16, product_id: u16, config: FilterConfig) -> Option<Self> {
        FilterCore::probe(table, vendor_id, product_id, config).map(|core| Filter(Mutex::new(core)))
    }

    pub fn remove(&self) {
        self.0.lock().unwrap().remove();
    }

    pub fn on_rx(&self, envelope: UsbIpEnvelope, urb: &mut Urb) -> UrbOutcome {
        self.0.lock().unwrap().on_rx(envelope, urb)
    }

    pub fn on_tx(&self, urb: &mut Urb) -> UrbOutcome {
        self.0.lock().unwrap().on_tx(urb)
    }

    pub fn tick(&self, now: Instant) -> Option<(UrbHandle, Vec<u8>)> {
        self.0.lock().unwrap().tick(now)
    }

    pub fn take_pending_injection(&self) -> Option<(UrbHandle, Vec<u8>)> {
        self.0.lock().unwrap().take_pending_injection()
    }

    pub fn take_queued_request(&self) -> Option<Vec<u8>> {
        self.0.lock().unwrap().take_queued_request()
    }

    pub fn state(&self) -> FilterState {
        self.0.lock().unwrap().state()
    }

    pub fn frame_count(&self) -> usize {
        self.0.lock().unwrap().frame_count()
    }

    pub fn set_observer(&self, observer: impl Fn(FilterEvent) + Send + Sync + 'static) {
        self.0.lock().unwrap().observer = Some(Box::new(observer));
    }
}
