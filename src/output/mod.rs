//! Terminal rendering of ranges and their host grids

use crate::client::{ClientState, ConnectionState, HostSlot, LastScan, Range};
use crate::network::{RangePrefix, HOSTS_PER_RANGE};
use colored::*;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::{self, Write};

/// Cells per grid row.
pub const GRID_COLUMNS: usize = 16;

/// Replies slower than this are drawn in yellow.
const SLOW_REPLY_MS: u32 = 100;

/// Output format options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub colored: bool,
    /// Clear the terminal before each redraw (watch mode)
    pub redraw: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            colored: true,
            redraw: false,
        }
    }
}

/// Renders client state to the terminal
pub struct OutputManager {
    config: OutputConfig,
}

impl OutputManager {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    /// Print every range with its grid, under an optional connection banner.
    pub fn write_state(&self, state: &ClientState, connection: Option<ConnectionState>) -> io::Result<()> {
        let output = match self.config.format {
            OutputFormat::Text => self.format_state(state, connection),
            OutputFormat::Json => format_json(state)?,
        };
        self.emit(&output)
    }

    pub fn write_range(&self, range: &Range) -> io::Result<()> {
        let output = match self.config.format {
            OutputFormat::Text => self.format_range(range),
            OutputFormat::Json => format_json(range)?,
        };
        self.emit(&output)
    }

    /// One line per configured range.
    pub fn write_range_list(&self, state: &ClientState) -> io::Result<()> {
        let output = match self.config.format {
            OutputFormat::Text => self.format_range_list(state),
            OutputFormat::Json => format_range_list_json(state)?,
        };
        self.emit(&output)
    }

    fn emit(&self, output: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        if self.config.redraw {
            // clear screen, cursor home
            stdout.write_all(b"\x1b[2J\x1b[H")?;
        }
        stdout.write_all(output.as_bytes())?;
        stdout.flush()
    }

    pub fn format_state(&self, state: &ClientState, connection: Option<ConnectionState>) -> String {
        let mut output = String::new();
        if let Some(connection) = connection {
            let _ = writeln!(output, "{}\n", self.format_connection(connection));
        }
        if state.ranges().is_empty() {
            output.push_str("No ranges configured.\n");
            return output;
        }
        for range in state.ranges() {
            output.push_str(&self.format_range(range));
            output.push('\n');
        }
        output
    }

    pub fn format_range(&self, range: &Range) -> String {
        let mut output = String::new();
        let header = format!(
            "{}.0/24  {}/{} up  {}",
            range.prefix,
            range.reachable_count(),
            HOSTS_PER_RANGE,
            describe_last_scan(&range.last_scan)
        );
        let _ = writeln!(output, "{}", self.paint(&header, |s| s.bold()));

        for (row, slots) in range.hosts.chunks(GRID_COLUMNS).enumerate() {
            let first_host = row * GRID_COLUMNS + 1;
            let _ = write!(output, "  .{:<3} ", first_host);
            for slot in slots {
                output.push_str(&self.format_cell(slot));
            }
            output.push('\n');
        }
        output
    }

    pub fn format_range_list(&self, state: &ClientState) -> String {
        if state.ranges().is_empty() {
            return "No ranges configured.\n".to_string();
        }
        let mut output = String::new();
        for range in state.ranges() {
            let _ = writeln!(
                output,
                "{:<12} {:>3}/{} up  {}",
                range.prefix.to_string(),
                range.reachable_count(),
                HOSTS_PER_RANGE,
                describe_last_scan(&range.last_scan)
            );
        }
        output
    }

    fn format_cell(&self, slot: &HostSlot) -> String {
        if !slot.reachable {
            return self.paint("    .", |s| s.dimmed());
        }
        let cell = format!("{:>5}", slot.latency_ms);
        if slot.latency_ms > SLOW_REPLY_MS {
            self.paint(&cell, |s| s.yellow())
        } else {
            self.paint(&cell, |s| s.green())
        }
    }

    fn format_connection(&self, connection: ConnectionState) -> String {
        match connection {
            ConnectionState::Connected => self.paint("● connected", |s| s.green()),
            ConnectionState::Connecting => self.paint("● connecting", |s| s.yellow()),
            ConnectionState::Disconnected => self.paint("● disconnected", |s| s.red()),
        }
    }

    fn paint(&self, text: &str, style: impl Fn(&str) -> ColoredString) -> String {
        if self.config.colored {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }
}

/// JSON row of `ranges list`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RangeSummary<'a> {
    prefix: RangePrefix,
    last_scan: &'a LastScan,
    reachable: usize,
}

fn format_range_list_json(state: &ClientState) -> io::Result<String> {
    let rows: Vec<RangeSummary<'_>> = state
        .ranges()
        .iter()
        .map(|range| RangeSummary {
            prefix: range.prefix,
            last_scan: &range.last_scan,
            reachable: range.reachable_count(),
        })
        .collect();
    format_json(&rows)
}

fn describe_last_scan(last_scan: &LastScan) -> String {
    match last_scan {
        LastScan::Never => "never scanned".to_string(),
        LastScan::Scanning => "scanning...".to_string(),
        LastScan::At(at) => format!("last scan {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
    }
}

fn format_json<T: Serialize + ?Sized>(value: &T) -> io::Result<String> {
    let mut json = serde_json::to_string_pretty(value).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    json.push('\n');
    Ok(json)
}
