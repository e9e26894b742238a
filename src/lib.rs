//! # PSoC Potentiostat Simulator Library
//!
//! This library contains the core logic for simulating the PSoC potentiostat
//! firmware. It holds the state the firmware keeps between USB commands and
//! processes the ASCII commands a host sends, returning the same responses
//! the real device gives.

pub mod run_params;

pub use run_params::{
    make_run_params, DecodeError, EncodeError, Field, RunParams, StartVoltType, SweepType,
};

use thiserror::Error;

// Response to the identify command.
const DEVICE_ID: &str = "PSTAT1";
// TIA feedback resistor values in ohms, indexed by the resistor setting.
pub const TIA_RESISTORS: [u32; 8] = [
    20_000, 30_000, 40_000, 80_000, 120_000, 250_000, 500_000, 1_000_000,
];

// Errors raised while processing a command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// Nothing left after stripping the USB padding.
    #[error("empty command")]
    Empty,
    /// The first byte does not name a command the firmware knows.
    #[error("unknown command {0:?}")]
    UnknownCommand(char),
    /// The command is known, but an argument is missing or malformed.
    #[error("invalid parameter in command {0:?}")]
    InvalidParameter(char),
    /// The run parameter command could not be decoded.
    #[error("invalid run parameters: {0}")]
    RunParams(#[from] DecodeError),
    /// A run was requested before any run parameters were loaded.
    #[error("no run parameters loaded")]
    NoRunParams,
}

// Represents all commands the firmware handles.
#[derive(Debug, PartialEq)]
enum Command<'a> {
    Identify,
    SetElectrodes(ElectrodeConfig),
    // Carries the raw command, decoded straight into the device's record.
    MakeRunParams(&'a str),
    StartRun,
    SetTimerPeriod(u16),
    SetTimerCompare(u16),
    SetDacValue(u16),
    SetupTiaAdc(AdcSettings),
    WakeHardware,
    Reset,
    ToggleEcho,
    ShortTia(bool),
}

// Number of electrodes the analog mux connects.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ElectrodeConfig {
    #[default]
    Two,
    Three,
}

// Settings of the current measuring chain (TIA and delta sigma ADC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcSettings {
    // 1 uses a Vref of +-2.048 V, 2 uses +-1.024 V.
    pub config: u8,
    pub tia_resistor_index: u8,
    // Gain is 2^index, so 1, 2, 4 or 8.
    pub buffer_gain_index: u8,
    pub external_resistor: bool,
    pub user_channel: u8,
}

impl Default for AdcSettings {
    fn default() -> Self {
        Self {
            config: 2,
            tia_resistor_index: 0,
            buffer_gain_index: 0,
            external_resistor: false,
            user_channel: 0,
        }
    }
}

impl AdcSettings {
    /// TIA feedback resistance in ohms, `None` for an index past the table.
    pub fn tia_resistor_ohms(&self) -> Option<u32> {
        TIA_RESISTORS.get(usize::from(self.tia_resistor_index)).copied()
    }

    /// ADC input buffer gain.
    pub fn buffer_gain(&self) -> u8 {
        1 << (self.buffer_gain_index & 0b11)
    }
}

// The main struct that holds the entire state of the simulated potentiostat.
#[derive(Debug, Clone, Default)]
pub struct Simulator {
    pub electrode_config: ElectrodeConfig,
    // Value in the voltage control DAC.
    pub dac_value: u16,
    // PWM timer that triggers the DAC and ADC interrupts.
    pub timer_period: u16,
    pub timer_compare: u16,
    pub adc: AdcSettings,
    // Parameters of the next sweep, filled in place by the 'S' command.
    pub run_params: RunParams,
    pub hardware_awake: bool,
    pub run_in_progress: bool,
    pub echo_usb: bool,
    pub tia_shorted: bool,
    run_params_loaded: bool,
}

impl Simulator {
    /// Creates a new `Simulator` in the firmware's power-on state.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once an 'S' command has been decoded successfully.
    pub fn has_run_params(&self) -> bool {
        self.run_params_loaded
    }

    /// Parses a trimmed command string into a `Command`.
    fn parse_command<'a>(&self, content: &'a str) -> Result<Command<'a>, CommandError> {
        let cmd_char = content.chars().next().ok_or(CommandError::Empty)?;

        match cmd_char {
            'I' => Ok(Command::Identify),
            'L' => match parse_argument(content, 1)? {
                2 => Ok(Command::SetElectrodes(ElectrodeConfig::Two)),
                3 => Ok(Command::SetElectrodes(ElectrodeConfig::Three)),
                _ => Err(CommandError::InvalidParameter(cmd_char)),
            },
            'S' => Ok(Command::MakeRunParams(content)),
            'R' => Ok(Command::StartRun),
            'T' => Ok(Command::SetTimerPeriod(parse_argument(content, 5)?)),
            'C' => Ok(Command::SetTimerCompare(parse_argument(content, 5)?)),
            'D' => Ok(Command::SetDacValue(parse_argument(content, 4)?)),
            'A' => parse_tia_adc(content).map(Command::SetupTiaAdc),
            'H' => Ok(Command::WakeHardware),
            'X' => Ok(Command::Reset),
            'M' => Ok(Command::ToggleEcho),
            's' => Ok(Command::ShortTia(true)),
            'd' => Ok(Command::ShortTia(false)),
            other => Err(CommandError::UnknownCommand(other)),
        }
    }

    /// Processes a command string and returns the appropriate response.
    pub fn process_command(&mut self, command_str: &str) -> Result<Option<String>, CommandError> {
        // USB buffers arrive zero padded, terminals add line endings.
        let content = command_str.trim_matches(|c: char| c == '\0' || c.is_ascii_whitespace());

        let result = self
            .parse_command(content)
            .and_then(|command| self.execute_command(command));
        if let Err(e) = &result {
            tracing::warn!(command = content, error = %e, "rejected command");
        }
        result
    }

    /// Executes a parsed command and returns the response, if the firmware sends one.
    fn execute_command(&mut self, command: Command<'_>) -> Result<Option<String>, CommandError> {
        match command {
            Command::Identify => return Ok(Some(String::from(DEVICE_ID))),
            Command::SetElectrodes(config) => {
                self.electrode_config = config;
                let response = match config {
                    ElectrodeConfig::Two => "2 ELECTRODE MODE",
                    ElectrodeConfig::Three => "3 ELECTRODE MODE",
                };
                return Ok(Some(String::from(response)));
            }
            Command::MakeRunParams(content) => {
                let params = make_run_params(content, &mut self.run_params)?;
                // The sweep's sample rate is loaded into the PWM right away.
                self.timer_period = params.timer_period;
                self.run_params_loaded = true;
                tracing::info!(params = %self.run_params, "run parameters loaded");
            }
            Command::StartRun => {
                if !self.run_params_loaded {
                    return Err(CommandError::NoRunParams);
                }
                self.hardware_awake = true;
                self.run_in_progress = true;
                tracing::info!(params = %self.run_params, "run started");
            }
            Command::SetTimerPeriod(period) => self.timer_period = period,
            Command::SetTimerCompare(compare) => self.timer_compare = compare,
            Command::SetDacValue(value) => self.dac_value = value,
            Command::SetupTiaAdc(settings) => {
                self.adc = settings;
                tracing::info!(
                    config = settings.config,
                    tia_ohms = ?settings.tia_resistor_ohms(),
                    gain = settings.buffer_gain(),
                    "TIA and ADC configured"
                );
            }
            Command::WakeHardware => self.hardware_awake = true,
            Command::Reset => {
                self.run_in_progress = false;
                self.hardware_awake = false;
                tracing::info!("device reset");
            }
            Command::ToggleEcho => self.echo_usb = !self.echo_usb,
            Command::ShortTia(shorted) => self.tia_shorted = shorted,
        }
        Ok(None)
    }
}

/// Parses the fixed-width decimal argument of an `X|NNNN` command.
fn parse_argument(content: &str, width: usize) -> Result<u16, CommandError> {
    let invalid = || CommandError::InvalidParameter(content.chars().next().unwrap_or('?'));

    let arg = content.get(1..).and_then(|rest| rest.strip_prefix('|')).ok_or_else(invalid)?;
    if arg.len() != width || !arg.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    u16::from_str_radix(arg, 10).map_err(|_| invalid())
}

/// Parses the `A|U|X|Y|Z|W` TIA and ADC setup command.
fn parse_tia_adc(content: &str) -> Result<AdcSettings, CommandError> {
    let invalid = || CommandError::InvalidParameter('A');

    let fields: Vec<&str> = content.split('|').collect();
    let [_, config, resistor, gain, external, channel] = fields.as_slice() else {
        return Err(invalid());
    };
    let digit = |field: &str, max: u8| -> Result<u8, CommandError> {
        match field.as_bytes() {
            [d @ b'0'..=b'9'] if d - b'0' <= max => Ok(d - b'0'),
            _ => Err(invalid()),
        }
    };

    let config = digit(*config, 2)?;
    if config == 0 {
        return Err(invalid());
    }
    let external_resistor = match *external {
        "T" => true,
        "F" => false,
        _ => return Err(invalid()),
    };

    Ok(AdcSettings {
        config,
        tia_resistor_index: digit(*resistor, 7)?,
        buffer_gain_index: digit(*gain, 3)?,
        external_resistor,
        user_channel: digit(*channel, 1)?,
    })
}
