//! AI algorithm control over the debug console
//!
//! Boards running the ST AI demos accept text commands on stdin to list,
//! select, start and stop their audio scene classification (ASC) and human
//! activity recognition (HAR) algorithms. Replies arrive on stdout and are
//! handed to `AiAlgosListener`s once a full line or an ACK byte arrived.

use crate::console::{DebugConsole, DebugConsoleListener};
use crate::node::Node;
use crate::transport::TransportError;
use crate::BlueStError;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause between the commands of one group
pub const DEFAULT_COMMAND_GAP: Duration = Duration::from_secs(1);

/// HAR algorithm selected until told otherwise
pub const DEFAULT_HAR_ALGO: &str = "gmp";

/// Byte the board sends to acknowledge a command
const ACK: char = '\u{1}';

const HELP: &str = "help             ";
const GET_ALGO: &str = "getAIAlgo";
const GET_ALL_ALGOS: &str = "getAllAIAlgo";
const GET_ALL_ALGO_DETAILS: &str = "getAllAIAlgoDetails";
const HAR_STOP_ALL: &str = "har stop ign_wsdm";
const ASC_STOP: &str = "asc stop         ";
const ASC_START: &str = "asc start        ";

fn har_start(har_algo: &str) -> String {
    format!("har start {}     ", har_algo)
}

fn har_stop(har_algo: &str) -> String {
    format!("har stop {}     ", har_algo)
}

fn set_algo(algo: u32) -> String {
    format!("setAIAlgo {}     ", algo)
}

/// Board replies to AI algorithm commands
pub trait AiAlgosListener: Send + Sync {
    /// A complete reply; `bytes_sent` counts the command bytes written so far
    fn on_response(&self, response: &str, bytes_sent: usize);
}

type ListenerList = Arc<RwLock<Vec<Arc<dyn AiAlgosListener>>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Selection {
    algo: u32,
    har_algo: String,
}

/// AI algorithm commands for one node
pub struct AiAlgos {
    node: Arc<Node>,
    console: Arc<DebugConsole>,
    listeners: ListenerList,
    collector: Mutex<Option<Arc<dyn DebugConsoleListener>>>,
    selection: Mutex<Selection>,
    command_gap: Duration,
}

impl AiAlgos {
    /// AI commands for `node`, if its board takes console commands and it
    /// exposes a debug console (connect first).
    pub fn for_node(node: &Arc<Node>) -> Option<Self> {
        if !node.device_type().accepts_console_commands() {
            return None;
        }
        let console = node.debug_console()?;
        Some(Self {
            node: node.clone(),
            console,
            listeners: Arc::new(RwLock::new(Vec::new())),
            collector: Mutex::new(None),
            selection: Mutex::new(Selection {
                algo: 0,
                har_algo: DEFAULT_HAR_ALGO.to_string(),
            }),
            command_gap: DEFAULT_COMMAND_GAP,
        })
    }

    pub fn with_command_gap(mut self, gap: Duration) -> Self {
        self.command_gap = gap;
        self
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn add_listener(&self, listener: Arc<dyn AiAlgosListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn AiAlgosListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Last algorithm selected with `set_algo`
    pub fn algo(&self) -> u32 {
        self.selection.lock().algo
    }

    /// HAR algorithm `start_algos` will start
    pub fn har_algo(&self) -> String {
        self.selection.lock().har_algo.clone()
    }

    /// Ask the board for its command list.
    pub fn available_commands(&self) -> Result<(), BlueStError> {
        self.run(&[HELP.to_string()])
    }

    /// Ask the board which algorithm is running.
    pub fn current_algo(&self) -> Result<(), BlueStError> {
        self.run(&[GET_ALGO.to_string()])
    }

    /// Ask the board for every algorithm it carries.
    pub fn algos(&self) -> Result<(), BlueStError> {
        self.run(&[GET_ALL_ALGOS.to_string()])
    }

    pub fn algo_details(&self) -> Result<(), BlueStError> {
        self.run(&[GET_ALL_ALGO_DETAILS.to_string()])
    }

    /// Stop both engines, select `algo` and restart them with `har_algo`.
    pub fn set_algo(&self, algo: u32, har_algo: &str) -> Result<(), BlueStError> {
        {
            let mut selection = self.selection.lock();
            selection.algo = algo;
            selection.har_algo = har_algo.to_string();
        }
        self.run(&[
            HAR_STOP_ALL.to_string(),
            ASC_STOP.to_string(),
            set_algo(algo),
            ASC_START.to_string(),
            har_start(har_algo),
        ])
    }

    pub fn stop_algos(&self) -> Result<(), BlueStError> {
        self.run(&[HAR_STOP_ALL.to_string(), ASC_STOP.to_string()])
    }

    /// Start ASC, then HAR with the last selected HAR algorithm.
    pub fn start_algos(&self) -> Result<(), BlueStError> {
        let har_algo = self.har_algo();
        self.run(&[ASC_START.to_string(), har_start(&har_algo)])
    }

    /// Restart HAR with `har_algo` and remember it.
    pub fn start_har_algo(&self, har_algo: &str) -> Result<(), BlueStError> {
        self.selection.lock().har_algo = har_algo.to_string();
        self.run(&[har_stop(har_algo), har_start(har_algo)])
    }

    pub fn start_asc_algo(&self) -> Result<(), BlueStError> {
        self.run(&[ASC_STOP.to_string(), ASC_START.to_string()])
    }

    /// Send one command group with a fresh reply collector.
    ///
    /// Groups never interleave: the collector lock is held until the last
    /// command is written.
    fn run(&self, commands: &[String]) -> Result<(), BlueStError> {
        let mut current = self.collector.lock();
        let collector: Arc<dyn DebugConsoleListener> =
            Arc::new(ResponseCollector::new(self.listeners.clone()));
        self.console.add_listener(collector.clone())?;
        if let Some(previous) = current.replace(collector) {
            self.console.remove_listener(&previous)?;
        }

        for (i, command) in commands.iter().enumerate() {
            if i > 0 && !self.command_gap.is_zero() {
                std::thread::sleep(self.command_gap);
            }
            self.send(command)?;
        }
        Ok(())
    }

    fn send(&self, command: &str) -> Result<(), BlueStError> {
        info!("Node {}: AI command {:?}", self.node.tag(), command.trim_end());
        let written = self.console.write_str(command)?;
        if written != command.len() {
            warn!(
                "AI command short write: {} of {} bytes",
                written,
                command.len()
            );
            return Err(BlueStError::Transport(TransportError::WriteFailed(format!(
                "{} of {} bytes of {:?}",
                written,
                command.len(),
                command.trim_end()
            ))));
        }
        Ok(())
    }
}

impl Drop for AiAlgos {
    fn drop(&mut self) {
        if let Some(collector) = self.collector.get_mut().take() {
            if let Err(e) = self.console.remove_listener(&collector) {
                debug!("AI commands: releasing debug console failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for AiAlgos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiAlgos")
            .field("node", &self.node.tag())
            .field("selection", &*self.selection.lock())
            .field("command_gap", &self.command_gap)
            .finish()
    }
}

/// Accumulates stdout until a reply is complete
struct ResponseCollector {
    listeners: ListenerList,
    buffer: Mutex<String>,
    bytes_sent: AtomicUsize,
}

impl ResponseCollector {
    fn new(listeners: ListenerList) -> Self {
        Self {
            listeners,
            buffer: Mutex::new(String::new()),
            bytes_sent: AtomicUsize::new(0),
        }
    }
}

impl DebugConsoleListener for ResponseCollector {
    fn on_stdout_receive(&self, _console: &Arc<DebugConsole>, data: &[u8]) {
        let response = {
            let mut buffer = self.buffer.lock();
            buffer.push_str(&String::from_utf8_lossy(data));
            if !buffer.ends_with('\n') && !buffer.ends_with(ACK) {
                return;
            }
            std::mem::take(&mut *buffer)
        };

        let bytes_sent = self.bytes_sent.load(Ordering::SeqCst);
        for listener in self.listeners.read().clone() {
            listener.on_response(&response, bytes_sent);
        }
    }

    fn on_stderr_receive(&self, _console: &Arc<DebugConsole>, data: &[u8]) {
        debug!("AI commands stderr: {}", String::from_utf8_lossy(data));
    }

    fn on_stdin_send(&self, _console: &Arc<DebugConsole>, data: &[u8], sent: bool) {
        if sent {
            self.bytes_sent.fetch_add(data.len(), Ordering::SeqCst);
        }
    }
}
