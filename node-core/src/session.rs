//! Per-boot session scheduling.
//!
//! A station boot runs one session: link up, open the command window, run an
//! acquisition if a start command arrived, then suspend. Suspend is terminal;
//! the next boot builds a fresh [`SessionScheduler`].

use core::ops::Add;
use core::time::Duration;

use crate::boot::NodeTimings;
use crate::wire::leading_decimal;

/// UDP port the command window listens on.
pub const COMMAND_PORT: u16 = 50_000;
/// How long a linked node waits for a start command.
pub const COMMAND_WINDOW: Duration = Duration::from_secs(10);
/// Receive timeout slice inside the command window.
pub const COMMAND_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Deep-sleep length between sessions.
pub const SUSPEND_INTERVAL: Duration = Duration::from_secs(5);
/// Receive buffer size for start commands; one byte is reserved.
pub const COMMAND_BUFFER_LEN: usize = 64;
/// Longest acquisition a start command may request.
pub const MAX_ACQUISITION_SECS: u32 = 3600;

const START_PREFIX: &[u8] = b"start,";

/// Parses a `start,<seconds>` command.
///
/// Returns `None` for datagrams that are not start commands. A start command
/// with a non-numeric duration yields `Some(0)`.
#[must_use]
pub fn parse_start_command(payload: &[u8]) -> Option<u32> {
    let payload = &payload[..payload.len().min(COMMAND_BUFFER_LEN - 1)];
    let argument = payload.strip_prefix(START_PREFIX)?;
    let text = match core::str::from_utf8(argument) {
        Ok(text) => text,
        Err(error) => core::str::from_utf8(&argument[..error.valid_up_to()]).unwrap_or(""),
    };
    let seconds = leading_decimal(text).min(u64::from(MAX_ACQUISITION_SECS));
    Some(u32::try_from(seconds).unwrap_or(MAX_ACQUISITION_SECS))
}

/// What the command window produced for this boot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionWindow<TInstant> {
    pub command_wait_deadline: TInstant,
    pub acquisition_duration_secs: u32,
}

/// Deadline-bounded listener for a single start command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CommandWindow<TInstant> {
    deadline: TInstant,
    result: Option<u32>,
}

impl<TInstant> CommandWindow<TInstant>
where
    TInstant: Copy + Ord + Add<Duration, Output = TInstant>,
{
    #[must_use]
    pub fn open(now: TInstant, length: Duration) -> Self {
        Self {
            deadline: now + length,
            result: None,
        }
    }

    #[must_use]
    pub const fn deadline(&self) -> TInstant {
        self.deadline
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.result.is_some()
    }

    /// Offers a received datagram. The first start command closes the window.
    pub fn offer(&mut self, now: TInstant, payload: &[u8]) -> Option<SessionWindow<TInstant>> {
        if self.is_closed() || now >= self.deadline {
            return self.poll(now);
        }
        let seconds = parse_start_command(payload)?;
        self.result = Some(seconds);
        Some(self.window(seconds))
    }

    /// Closes the window with a zero duration once the deadline has passed.
    pub fn poll(&mut self, now: TInstant) -> Option<SessionWindow<TInstant>> {
        if self.is_closed() {
            return None;
        }
        if now >= self.deadline {
            self.result = Some(0);
            return Some(self.window(0));
        }
        None
    }

    const fn window(&self, seconds: u32) -> SessionWindow<TInstant> {
        SessionWindow {
            command_wait_deadline: self.deadline,
            acquisition_duration_secs: seconds,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionPhase<TInstant> {
    Booting,
    /// Waiting for the link's ready signal. No timeout.
    AwaitingLink,
    AwaitingCommand(CommandWindow<TInstant>),
    Acquiring { until: TInstant },
    Suspended,
}

/// Instruction for the runtime.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionAction<TInstant> {
    /// Start the station link and wait for ready.
    ConnectLink,
    /// Bind the command port and launch the discovery broadcaster.
    BeginCommandWindow { deadline: TInstant },
    /// Enable CSI export and the traffic probe until `until`.
    StartAcquisition { seconds: u32, until: TInstant },
    /// Stop the radio and power down for `interval`.
    Suspend { interval: Duration },
}

/// Top-level state machine for one station boot.
#[derive(Debug)]
pub struct SessionScheduler<TInstant> {
    timings: NodeTimings,
    phase: SessionPhase<TInstant>,
}

impl<TInstant> SessionScheduler<TInstant>
where
    TInstant: Copy + Ord + Add<Duration, Output = TInstant>,
{
    #[must_use]
    pub const fn new(timings: NodeTimings) -> Self {
        Self {
            timings,
            phase: SessionPhase::Booting,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> SessionPhase<TInstant> {
        self.phase
    }

    /// First action of every station boot.
    pub fn start(&mut self) -> Option<SessionAction<TInstant>> {
        if self.phase != SessionPhase::Booting {
            return None;
        }
        self.phase = SessionPhase::AwaitingLink;
        Some(SessionAction::ConnectLink)
    }

    /// The link reported ready.
    pub fn on_ready(&mut self, now: TInstant) -> Option<SessionAction<TInstant>> {
        if self.phase != SessionPhase::AwaitingLink {
            return None;
        }
        let window = CommandWindow::open(now, self.timings.command_window);
        self.phase = SessionPhase::AwaitingCommand(window);
        Some(SessionAction::BeginCommandWindow {
            deadline: window.deadline(),
        })
    }

    /// A datagram arrived on the command port.
    pub fn on_datagram(&mut self, now: TInstant, payload: &[u8]) -> Option<SessionAction<TInstant>> {
        let SessionPhase::AwaitingCommand(mut window) = self.phase else {
            return None;
        };
        let closed = window.offer(now, payload);
        self.phase = SessionPhase::AwaitingCommand(window);
        closed.map(|session| self.close_window(now, session))
    }

    /// Advances time-driven transitions.
    pub fn on_tick(&mut self, now: TInstant) -> Option<SessionAction<TInstant>> {
        match self.phase {
            SessionPhase::AwaitingCommand(mut window) => {
                let closed = window.poll(now);
                self.phase = SessionPhase::AwaitingCommand(window);
                closed.map(|session| self.close_window(now, session))
            }
            SessionPhase::Acquiring { until } if now >= until => Some(self.suspend()),
            _ => None,
        }
    }

    fn close_window(
        &mut self,
        now: TInstant,
        session: SessionWindow<TInstant>,
    ) -> SessionAction<TInstant> {
        let seconds = session.acquisition_duration_secs;
        if seconds == 0 {
            return self.suspend();
        }
        let until = now + self.timings.acquisition(seconds);
        self.phase = SessionPhase::Acquiring { until };
        SessionAction::StartAcquisition { seconds, until }
    }

    fn suspend(&mut self) -> SessionAction<TInstant> {
        self.phase = SessionPhase::Suspended;
        SessionAction::Suspend {
            interval: self.timings.suspend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_command_parsing() {
        assert_eq!(parse_start_command(b"start,30"), Some(30));
        assert_eq!(parse_start_command(b"start,30\n"), Some(30));
        assert_eq!(parse_start_command(b"start,soon"), Some(0));
        assert_eq!(parse_start_command(b"start,"), Some(0));
        assert_eq!(parse_start_command(b"start,99999"), Some(MAX_ACQUISITION_SECS));
        assert_eq!(parse_start_command(b"stop,30"), None);
        assert_eq!(parse_start_command(b"START,30"), None);
        assert_eq!(parse_start_command(b""), None);
    }

    #[test]
    fn window_ignores_late_commands() {
        let mut window = CommandWindow::open(Duration::ZERO, Duration::from_secs(10));
        assert_eq!(window.offer(Duration::from_secs(9), b"hello"), None);
        let closed = window
            .offer(Duration::from_secs(10), b"start,5")
            .expect("deadline reached");
        assert_eq!(closed.acquisition_duration_secs, 0);
        assert!(window.is_closed());
        assert_eq!(window.poll(Duration::from_secs(11)), None);
    }
}
