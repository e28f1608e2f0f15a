////////////////////////////////////////////////////
//! # Parsing
//!
//! Contains everything that runs through a demo file.
//!
//! ## Mods
//!
//! [`cursor`] reads bits. [`header`] and [`packet`] frame the file,
//! [`message`] splits packets into net messages, [`stringtable`],
//! [`datatable`]/[`sendprop`], [`entities`] and [`gameevent`] decode what
//! they carry and [`state`] folds all of it into a [`ParserState`].
//! [`datacollection`] and [`internals`] hold the handlers used by the
//! library entry points.
//!
//! ## Structures
//! [`DemoParser`] drives a [`MessageHandler`] over a demo.
//! [`DemoTicker`] does the same one command at a time and can be
//! checkpointed into a [`DecodeState`].
//! [`ParseWorker`] runs a tick query on its own thread and reports progress.

pub mod cursor;
pub mod datacollection;
pub mod datatable;
pub mod entities;
pub mod gameevent;
pub mod header;
pub mod internals;
pub mod message;
pub mod packet;
pub mod sendprop;
pub mod state;
pub mod stringtable;

use std::path::PathBuf;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use self::cursor::Cursor;
use self::datatable::{read_data_tables, Schema};
use self::entities::EntityChange;
use self::header::read_header;
use self::message::{Message, MessageType, MESSAGE_TYPE_BITS};
use self::packet::{peek_command, read_command, Command, CommandFrame};
use self::state::{ParserState, StateUpdate};
use self::stringtable::{read_snapshot, StringTableEntry};
use crate::errors::{DecodeError, Diagnostic, ReadResult, Result};
use crate::query::{TickCollector, TickQuery, TickTable};
use crate::types::demo::Header;
use crate::types::DemoTick;

///////////////////////////////////////////////////
/// HANDLERS
/// ///////////////////////////////////////////////

/// Observes a decode. The parser owns the state; handlers only read it.
pub trait MessageHandler {
    type Output;

    /// Whether [`MessageHandler::handle_message`] wants this message type.
    fn does_handle(message_type: MessageType) -> bool;

    fn handle_header(&mut self, _header: &Header) {}

    fn handle_data_tables(&mut self, _schema: &Schema, _state: &ParserState) {}

    fn handle_string_entry(&mut self, _table: &str, _index: usize, _entry: &StringTableEntry, _state: &ParserState) {}

    fn handle_message(&mut self, _message: &Message, _tick: DemoTick, _state: &ParserState) -> ReadResult<()> {
        Ok(())
    }

    /// Called after a packet entities message was applied to the state.
    fn handle_entities(&mut self, _changes: &[EntityChange], _tick: DemoTick, _state: &ParserState) -> ReadResult<()> {
        Ok(())
    }

    /// All commands of `tick` have been applied. `next_tick` is the tick of
    /// the command that closed it, `None` at the end of the demo.
    fn handle_tick_end(&mut self, _tick: DemoTick, _next_tick: Option<DemoTick>, _state: &ParserState) -> ReadResult<()> {
        Ok(())
    }

    fn handle_diagnostic(&mut self, _diagnostic: Diagnostic) {}

    /// Stops the decode early once the handler has everything it needs.
    fn is_done(&self) -> bool {
        false
    }

    fn into_output(self, state: &ParserState) -> Self::Output;
}

pub trait BorrowMessageHandler: MessageHandler {
    fn borrow_output(&self, state: &ParserState) -> &Self::Output;
}

/// Handler that collects nothing, for walking the state.
#[derive(Default, Debug, Clone, Copy)]
pub struct NullHandler;

impl MessageHandler for NullHandler {
    type Output = ();

    fn does_handle(_message_type: MessageType) -> bool {
        false
    }

    fn into_output(self, _state: &ParserState) -> Self::Output {}
}

impl BorrowMessageHandler for NullHandler {
    fn borrow_output(&self, _state: &ParserState) -> &Self::Output {
        &()
    }
}

///////////////////////////////////////////////////
/// DRIVER
/// ///////////////////////////////////////////////

/// Everything needed to continue a decode at a command boundary.
#[derive(Debug, Clone)]
pub struct DecodeState {
    pub header: Header,
    pub state: ParserState,
    /// Bit position of the next command.
    pub position: usize,
    /// The tick whose end has not been reported yet.
    pub open_tick: Option<DemoTick>,
}

pub struct DemoParser<'a, H: MessageHandler> {
    bytes: &'a [u8],
    handler: H,
    resume: Option<DecodeState>,
}

impl<'a, H: MessageHandler> DemoParser<'a, H> {
    pub fn new(bytes: &'a [u8], handler: H) -> Self {
        DemoParser {
            bytes,
            handler,
            resume: None,
        }
    }

    /// Continues from a checkpoint taken on the same bytes.
    pub fn resume(bytes: &'a [u8], from: &DecodeState, handler: H) -> Self {
        DemoParser {
            bytes,
            handler,
            resume: Some(from.clone()),
        }
    }

    pub fn parse(self) -> Result<(Header, H::Output)> {
        let (header, mut ticker) = self.ticker()?;
        while ticker.tick()? {}
        Ok((header, ticker.into_output()))
    }

    pub fn ticker(self) -> Result<(Header, DemoTicker<'a, H>)> {
        let mut cursor = Cursor::new(self.bytes);
        let mut handler = self.handler;

        let (header, state, open_tick) = match self.resume {
            Some(resume) => {
                cursor.seek(resume.position).map_err(|kind| DecodeError::new(kind, 0, 0))?;
                log::debug!(
                    "resuming decode at byte {} (tick {:?})",
                    resume.position / 8,
                    resume.open_tick
                );
                (resume.header, resume.state, resume.open_tick)
            }
            None => {
                let header = read_header(&mut cursor).map_err(|kind| DecodeError::new(kind, 0, 0))?;
                log::info!(
                    "decoding {} demo on {}: {} ticks, {:.1}s",
                    header.game_dir,
                    header.map,
                    header.ticks,
                    header.duration
                );
                let state = ParserState::new(header.network_protocol);
                (header, state, None)
            }
        };

        handler.handle_header(&header);
        if let Ok(schema) = state.schema() {
            handler.handle_data_tables(schema, &state);
        }

        let ticker = DemoTicker {
            cursor,
            handler,
            state,
            header: header.clone(),
            open_tick,
            finished: false,
        };
        Ok((header, ticker))
    }
}

/// A decode in progress, advanced one command per [`DemoTicker::tick`].
pub struct DemoTicker<'a, H: MessageHandler> {
    cursor: Cursor<'a>,
    handler: H,
    state: ParserState,
    header: Header,
    open_tick: Option<DemoTick>,
    finished: bool,
}

impl<'a, H: MessageHandler> DemoTicker<'a, H> {
    /// Processes the next command. Returns `false` once the demo is done.
    pub fn tick(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        // a command is at least its type byte
        if self.handler.is_done() || self.cursor.remaining() < 8 {
            self.finish()?;
            return Ok(false);
        }

        let offset = self.cursor.position() / 8;
        // blame a truncated command on its own tick when the header survived
        let pending_tick = peek_command(&self.cursor).map_or(self.state.tick, |(_, tick)| tick);
        let frame = read_command(&mut self.cursor, self.state.tick)
            .map_err(|kind| DecodeError::new(kind, pending_tick, offset))?;
        let (tick, offset) = (frame.tick, frame.offset);

        if matches!(frame.command, Command::Stop) {
            log::debug!("stop command at tick {tick}");
            self.finish()?;
            return Ok(false);
        }

        self.process(frame).map_err(|kind| DecodeError::new(kind, tick, offset))?;
        Ok(true)
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        if let Some(open) = self.open_tick {
            self.handler
                .handle_tick_end(open, None, &self.state)
                .map_err(|kind| DecodeError::new(kind, open, self.cursor.position() / 8))?;
        }
        Ok(())
    }

    fn process(&mut self, frame: CommandFrame<'a>) -> ReadResult<()> {
        let tick = self.enter_tick(frame.tick)?;
        log::trace!("command {} at tick {} (byte {})", frame.kind, tick, frame.offset);

        match frame.command {
            Command::SignOn(block) | Command::Packet(block) => {
                let mut data = block.data;
                while data.remaining() >= MESSAGE_TYPE_BITS {
                    let message = Message::read(&mut data, self.state.network_protocol)?;
                    let update = self.state.handle_message(&message)?;
                    if H::does_handle(message.message_type()) {
                        self.handler.handle_message(&message, tick, &self.state)?;
                    }
                    self.notify(update, tick)?;
                }
            }
            Command::DataTables(mut data) => {
                let (tables, classes) = read_data_tables(&mut data)?;
                self.state.set_schema(Schema::build(tables, classes)?);
                self.handler.handle_data_tables(self.state.schema()?, &self.state);
            }
            Command::StringTables(mut data) => {
                let snapshot = read_snapshot(&mut data)?;
                log::debug!("string table snapshot with {} tables", snapshot.len());
                let update = self.state.apply_snapshot(snapshot);
                self.notify(update, tick)?;
            }
            Command::ConsoleCmd(command) => log::trace!("console command {command:?}"),
            Command::Unknown { kind, length } => {
                log::warn!("skipping unknown command {kind} ({length} bytes) at byte {}", frame.offset);
                self.handler.handle_diagnostic(Diagnostic::UnknownCommand {
                    kind,
                    tick,
                    offset: frame.offset,
                });
            }
            Command::SyncTick | Command::UserCmd { .. } | Command::Stop => {}
        }
        Ok(())
    }

    /// Closes the open tick when `tick` moves past it.
    fn enter_tick(&mut self, tick: DemoTick) -> ReadResult<DemoTick> {
        match self.open_tick {
            Some(open) if tick > open => {
                self.handler.handle_tick_end(open, Some(tick), &self.state)?;
            }
            Some(open) if tick < open => {
                log::warn!("command for tick {tick} after tick {open}, keeping {open}");
                return Ok(open);
            }
            _ => {}
        }
        self.open_tick = Some(tick);
        self.state.tick = tick;
        Ok(tick)
    }

    fn notify(&mut self, update: StateUpdate, tick: DemoTick) -> ReadResult<()> {
        for (table_index, entry_index) in update.string_entries {
            let Some(table) = self.state.string_tables.get(table_index) else {
                continue;
            };
            if let Some(entry) = table.get(entry_index) {
                self.handler
                    .handle_string_entry(&table.name, entry_index, entry, &self.state);
            }
        }
        if !update.entities.is_empty() {
            self.handler.handle_entities(&update.entities, tick, &self.state)?;
        }
        Ok(())
    }

    /// Tick of the next command, without reading it.
    pub fn peek_tick(&self) -> Option<DemoTick> {
        if self.finished {
            return None;
        }
        peek_command(&self.cursor).map(|(_, tick)| tick)
    }

    pub fn checkpoint(&self) -> DecodeState {
        DecodeState {
            header: self.header.clone(),
            state: self.state.clone(),
            position: self.cursor.position(),
            open_tick: self.open_tick,
        }
    }

    pub fn parser_state(&self) -> &ParserState {
        &self.state
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_output(self) -> H::Output {
        self.handler.into_output(&self.state)
    }
}

impl<'a, H: BorrowMessageHandler> DemoTicker<'a, H> {
    pub fn state(&self) -> &H::Output {
        self.handler.borrow_output(&self.state)
    }
}

///////////////////////////////////////////////////
/// WORKER
/// ///////////////////////////////////////////////

#[derive(Debug, thiserror::Error)]
pub enum ParseWorkerError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("could not read demo: {0}")]
    Io(#[from] std::io::Error),
    #[error("progress receiver hung up")]
    Send,
}

impl From<mpsc::SendError<ParseProgressReport>> for ParseWorkerError {
    fn from(_value: mpsc::SendError<ParseProgressReport>) -> Self {
        ParseWorkerError::Send
    }
}

#[derive(Default, Debug)]
pub enum ParseProgressReport {
    #[default]
    Waiting,
    /// Total tick count from the header.
    Info(u32),
    Working(DemoTick),
    Done(TickTable),
    Error(ParseWorkerError),
}

/// Runs a tick query over a file on a background thread.
pub struct ParseWorker {
    #[allow(dead_code)]
    handle: JoinHandle<()>,
    prog_recv: mpsc::Receiver<ParseProgressReport>,
}

impl ParseWorker {
    pub fn new(fpath: PathBuf, query: TickQuery) -> Self {
        log::info!("Beginning parse: {:?}", fpath);

        let (prog_send, prog_recv) = mpsc::channel::<ParseProgressReport>();

        let handle = thread::spawn(move || {
            use ParseProgressReport::*;
            let error_catch = || -> std::result::Result<(), ParseWorkerError> {
                let file = std::fs::read(&fpath)?;
                let parser = DemoParser::new(&file, TickCollector::new(&query));
                let (header, mut ticker) = parser.ticker()?;

                prog_send.send(Info(header.ticks))?;

                let mut last_reported = None;
                while ticker.tick()? {
                    let tick = ticker.parser_state().tick;
                    if last_reported != Some(tick) {
                        prog_send.send(Working(tick))?;
                        last_reported = Some(tick);
                    }
                }

                let table = ticker.into_output().into_table(query.layout, query.order);
                // done is the last thing we could send
                prog_send.send(Done(table)).map_err(ParseWorkerError::from)
            };

            if let Err(err) = error_catch() {
                let _ = prog_send.send(Error(err));
            }
        });

        ParseWorker { handle, prog_recv }
    }

    pub fn get_next(&self) -> Option<ParseProgressReport> {
        self.prog_recv.try_recv().ok()
    }

    /// Blocks until the next report; `None` once the worker is gone.
    pub fn wait_next(&self) -> Option<ParseProgressReport> {
        self.prog_recv.recv().ok()
    }

    pub fn get_most_recent(&self) -> Option<ParseProgressReport> {
        let mut last: Option<ParseProgressReport> = None;
        while let Ok(report) = self.prog_recv.try_recv() {
            last = Some(report);
        }
        last
    }
}
