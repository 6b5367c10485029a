//! The peripheral boot sequence of the OMAP44xx ROM.
//!
//! The ROM accepts a second stage (x-loader) over USB, which in turn announces itself with a banner
//! and accepts the third stage (usually U-Boot). After that the device belongs to the third stage
//! and the session is over.

use crate::asic_id::AsicId;
use crate::config::BootConfig;
use crate::context::TransportOpener;
use crate::error::{Error, Result, TransportError};
use crate::hex::Hex;
use crate::locator::{Clock, DeviceLocator, SystemClock};
use crate::operation::{Image, Operation, Upload};
use crate::transport::BulkTransport;
use log::{debug, error, info, trace};
use std::fmt;
use std::io::{self, BufRead, Read, Write};

/// Sent by a second stage which is waiting for the third stage to be uploaded.
pub const BANNER: u32 = 0xAABB_CCDD;

/// Commands understood by the ROM. They are sent as little-endian `u32`s.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Command {
    GetId = 0xF003_0003,
    Boot = 0xF003_0002,
}

impl Command {
    pub fn to_bytes(self) -> [u8; 4] {
        (self as u32).to_le_bytes()
    }
}

/// Progress of a [`BootSession`](struct.BootSession.html).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// Nothing has happened yet.
    Idle,
    /// Polling for the ROM to enumerate.
    AwaitingDevice,
    /// A transport to the ROM is open.
    Connected,
    IdQueried,
    Stage2Sent,
    Stage2Uploading,
    SettlingAfterStage2,
    Reconnecting,
    AwaitingBanner,
    AwaitingManualGate,
    Stage3Uploading,
    /// Both stages were uploaded and the transport is closed.
    Closed,
    /// The boot was aborted. The device has to be reset before trying again.
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Confirmation from the person at the device before the third stage is uploaded.
///
/// U-Boot powers the board off right away if it finds no battery, so the battery has to go in after
/// the ROM took over (which it only does without a battery) and before the third stage runs.
pub trait OperatorGate {
    /// Blocks until the operator confirms. An error aborts the boot.
    fn confirm(&mut self) -> Result<()>;
}

/// Prompts on standard output and waits for a line on standard input.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdinGate;

impl OperatorGate for StdinGate {
    fn confirm(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        stdout
            .write_all(b"Insert battery and press enter to upload the third stage > ")
            .and_then(|_| stdout.flush())
            .map_err(Error::Io)?;

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            // End of input means nobody is there to confirm
            Ok(0) => Err(Error::Cancelled),
            Ok(_) => Ok(()),
            Err(err) => Err(Error::Io(err)),
        }
    }
}

/// Drives one device from the ROM through to the third stage.
pub struct BootSession<O: TransportOpener, C: Clock = SystemClock> {
    locator: DeviceLocator<O, C>,

    /// The only live handle to the device. `None` while reconnecting and after the session ended.
    transport: Option<Box<dyn BulkTransport>>,

    config: BootConfig,
    gate: Box<dyn OperatorGate>,
    state: State,
    transitions: Vec<State>,
}

impl<O: TransportOpener, C: Clock> BootSession<O, C> {
    /// Waits for the ROM to enumerate (or makes a single attempt if not `blocking`) and opens a
    /// session to it.
    pub fn connect(
        locator: DeviceLocator<O, C>,
        config: BootConfig,
        blocking: bool,
    ) -> Result<Self> {
        config.validate()?;
        let mut session = BootSession {
            locator,
            transport: None,
            config,
            gate: Box::new(StdinGate),
            state: State::Idle,
            transitions: vec![State::Idle],
        };

        session.transition(State::AwaitingDevice);
        let transport = session.locator.locate(blocking)?;
        session.attach(transport)?;
        Ok(session)
    }

    /// Opens a session on a transport which was already located.
    pub fn new(
        locator: DeviceLocator<O, C>,
        transport: Box<dyn BulkTransport>,
        config: BootConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut session = BootSession {
            locator,
            transport: None,
            config,
            gate: Box::new(StdinGate),
            state: State::Idle,
            transitions: vec![State::Idle],
        };
        session.attach(transport)?;
        Ok(session)
    }

    /// Replaces the operator confirmation, which defaults to [`StdinGate`].
    ///
    /// [`StdinGate`]: struct.StdinGate.html
    pub fn with_gate<G: OperatorGate + 'static>(mut self, gate: G) -> Self {
        self.gate = Box::new(gate);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Every state the session went through, in order.
    pub fn transitions(&self) -> &[State] {
        &self.transitions
    }

    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    /// Asks the ROM for its ASIC ID.
    ///
    /// This is informational only and not needed for booting, so a failure leaves the session
    /// usable.
    pub fn id(&mut self) -> Result<AsicId> {
        self.expect_ready()?;
        self.locator.cancel_token().check()?;

        self.send_command(Command::GetId)?;
        let length = self.config.id_read_length;
        let blob = self.transport()?.read(length)?;
        debug!("Received ASIC ID: {}", Hex(&blob));

        let id = AsicId::parse(&blob)?;
        self.transition(State::IdQueried);
        info!("ASIC ID received, ROM revision {:?}", id.rom_revision());
        Ok(id)
    }

    /// Runs the boot sequence: uploads `stage2`, waits for it to announce itself, then uploads
    /// `stage3`. Unless `auto_confirm` is set, the operator is asked to confirm before the third
    /// stage.
    ///
    /// Any error is final. The device's state is unknown afterwards, so the transport is closed
    /// and the session enters [`State::Failed`].
    ///
    /// [`State::Failed`]: enum.State.html#variant.Failed
    pub fn boot<A: Read, B: Read>(
        &mut self,
        stage2: Image<A>,
        stage3: Image<B>,
        auto_confirm: bool,
    ) -> Result<()> {
        self.expect_ready()?;

        let result = self
            .run_boot(stage2, stage3, auto_confirm)
            .and_then(|()| self.close_transport());
        match result {
            Ok(()) => {
                self.transition(State::Closed);
                info!("Third stage uploaded, device handed over");
                Ok(())
            }
            Err(err) => {
                error!("Boot failed in state {}: {}", self.state, err);
                if let Err(close_err) = self.close_transport() {
                    debug!("Closing transport after failure: {}", close_err);
                }
                self.transition(State::Failed);
                Err(err)
            }
        }
    }

    /// Ends the session without booting.
    pub fn close(&mut self) -> Result<()> {
        self.close_transport()?;
        if self.state != State::Failed && self.state != State::Closed {
            self.transition(State::Closed);
        }
        Ok(())
    }

    fn run_boot<A: Read, B: Read>(
        &mut self,
        stage2: Image<A>,
        stage3: Image<B>,
        auto_confirm: bool,
    ) -> Result<()> {
        self.locator.cancel_token().check()?;
        self.transition(State::Stage2Sent);
        self.send_command(Command::Boot)?;

        self.transition(State::Stage2Uploading);
        self.upload(stage2)?;
        info!("Second stage uploaded");

        self.locator.cancel_token().check()?;
        self.transition(State::SettlingAfterStage2);
        self.locator.clock().sleep(self.config.settle_delay);

        self.locator.cancel_token().check()?;
        self.transition(State::Reconnecting);
        self.reconnect()?;

        self.transition(State::AwaitingBanner);
        let banner = self.transport()?.read_exact(4)?;
        let banner = u32::from_le_bytes([banner[0], banner[1], banner[2], banner[3]]);
        if banner != BANNER {
            return Err(Error::violation(
                "second stage banner",
                format_args!("0x{:08X}", BANNER),
                format_args!("0x{:08X}", banner),
            ));
        }
        info!("Received banner 0x{:08X} from second stage", banner);

        if !auto_confirm {
            self.transition(State::AwaitingManualGate);
            self.gate.confirm()?;
        }

        self.locator.cancel_token().check()?;
        self.transition(State::Stage3Uploading);
        self.upload(stage3)
    }

    /// Replaces the transport if the second stage can only be reached through a fresh handle.
    fn reconnect(&mut self) -> Result<()> {
        let requires_reopen = self.transport()?.reopen_after_reenumeration();
        if !self.config.reopen(requires_reopen) {
            debug!("Keeping the transport across re-enumeration");
            return Ok(());
        }

        // The old handle is dead before the new one is opened; the two never coexist
        self.close_transport()?;
        let transport = self.locator.locate_with(self.config.reconnect_policy)?;
        self.install(transport)?;
        debug!("Reopened the transport to the second stage");
        Ok(())
    }

    fn upload<R: Read>(&mut self, image: Image<R>) -> Result<()> {
        let chunk_size = self.config.upload_chunk_size;
        let mut upload = Upload::new(self.transport()?, image, chunk_size);
        let total = upload.total();
        for step in &mut upload {
            let sent = step?;
            trace!("Uploaded {} of {} bytes", sent, total);
        }
        Ok(())
    }

    fn send_command(&mut self, command: Command) -> Result<()> {
        debug!("Sending {:?}", command);
        self.transport()?.write(&command.to_bytes())?;
        Ok(())
    }

    fn attach(&mut self, transport: Box<dyn BulkTransport>) -> Result<()> {
        self.install(transport)?;
        self.transition(State::Connected);
        Ok(())
    }

    fn install(&mut self, mut transport: Box<dyn BulkTransport>) -> Result<()> {
        transport.set_timeout(self.config.timeout)?;
        self.transport = Some(transport);
        Ok(())
    }

    fn close_transport(&mut self) -> Result<()> {
        match self.transport.take() {
            Some(mut transport) => transport.close(),
            None => Ok(()),
        }
    }

    fn transport(&mut self) -> Result<&mut (dyn BulkTransport + 'static)> {
        match self.transport.as_mut() {
            Some(transport) => Ok(transport.as_mut()),
            None => Err(TransportError::Closed.into()),
        }
    }

    fn expect_ready(&self) -> Result<()> {
        match self.state {
            State::Connected | State::IdQueried => Ok(()),
            state => Err(Error::Configuration(format!(
                "session is in state {}, expected a freshly connected ROM",
                state
            ))),
        }
    }

    fn transition(&mut self, state: State) {
        debug!("{} -> {}", self.state, state);
        self.state = state;
        self.transitions.push(state);
    }
}
